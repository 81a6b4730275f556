use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::config::ModuleKind;
use crate::probe::fetch::BoundedFetcher;
use crate::report::{RawRecord, ReportSink};
use crate::scheduler::CheckModule;
use crate::utils::with_query_pairs;

static SIGNATURE_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?i)X-Amz-Signature=", r"(?i)X-Goog-Signature=", r"(?i)[?&]se=\d{10,}", r"(?i)[?&]sig="]
        .iter()
        .map(|p| Regex::new(p).expect("valid built-in pattern"))
        .collect()
});

/// Query keys that carry the signature itself.
const SIGNATURE_KEYS: &[&str] = &["x-amz-signature", "x-goog-signature", "sig", "signature"];

/// Ten days, in seconds.
pub const EXPIRY_EXTENSION: u64 = 864_000;

pub fn looks_signed(url: &str) -> bool {
    SIGNATURE_MARKERS.iter().any(|re| re.is_match(url))
}

/// The URL with every signature parameter removed, or `None` when it had
/// none to remove.
pub fn strip_signature(url: &Url) -> Option<Url> {
    let all: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let kept: Vec<(String, String)> = all
        .iter()
        .filter(|(k, _)| !SIGNATURE_KEYS.contains(&k.to_ascii_lowercase().as_str()))
        .cloned()
        .collect();
    (kept.len() != all.len()).then(|| with_query_pairs(url, &kept))
}

/// The URL with a numeric `se` expiry pushed ten days further out.
pub fn extend_expiry(url: &Url) -> Option<Url> {
    let mut changed = false;
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .map(|(k, v)| {
            if k == "se" {
                if let Ok(ts) = v.parse::<u64>() {
                    changed = true;
                    return (k, ts.saturating_add(EXPIRY_EXTENSION).to_string());
                }
            }
            (k, v)
        })
        .collect();
    changed.then(|| with_query_pairs(url, &pairs))
}

pub struct SignedUrlCheck {
    fetcher: Arc<BoundedFetcher>,
    reporter: Arc<dyn ReportSink>,
}

impl SignedUrlCheck {
    pub fn new(fetcher: Arc<BoundedFetcher>, reporter: Arc<dyn ReportSink>) -> Self {
        Self { fetcher, reporter }
    }

    async fn check(&self, endpoint: &str) -> anyhow::Result<()> {
        if !looks_signed(endpoint) {
            return Ok(());
        }
        let Ok(url) = Url::parse(endpoint) else {
            return Ok(());
        };

        if let Some(stripped) = strip_signature(&url) {
            let test = stripped.to_string();
            match self.fetcher.get(&test).await {
                Ok(r) if r.status == 200 => {
                    let rec = RawRecord::new(
                        "Signed URL Misuse — Signature Not Enforced",
                        &test,
                        "Removed signature parameters and still received 200.",
                    )
                    .with_curl(format!("curl -i '{}'", test));
                    self.reporter.record(rec).await?;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(url = %test, error = %e, "unsigned probe failed"),
            }
        }

        if let Some(extended) = extend_expiry(&url) {
            let test = extended.to_string();
            match self.fetcher.get(&test).await {
                Ok(r) if r.status == 200 && test != endpoint => {
                    let rec = RawRecord::new(
                        "Signed URL Misuse — Expiry Tampering",
                        &test,
                        "Extended `se` expiry and still received 200.",
                    )
                    .with_curl(format!("curl -i '{}'", test));
                    self.reporter.record(rec).await?;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(url = %test, error = %e, "expiry probe failed"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CheckModule for SignedUrlCheck {
    fn kind(&self) -> ModuleKind {
        ModuleKind::SignedUrls
    }

    async fn run(&self, endpoints: &[String]) -> anyhow::Result<()> {
        for res in join_all(endpoints.iter().map(|e| self.check(e))).await {
            res?;
        }
        Ok(())
    }
}
