use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use url::Url;

use crate::config::ModuleKind;
use crate::probe::fetch::BoundedFetcher;
use crate::report::{RawRecord, ReportSink};
use crate::scheduler::CheckModule;
use crate::utils::substitute_query;

pub const SSRF_KEYS: &[&str] = &["url", "dest", "domain", "host", "image", "feed", "callback", "target", "path"];

/// Unique canary URL: `http://{prefix}-{12 hex}.{domain}/ping`.
pub fn canary_url(prefix: &str, domain: &str) -> String {
    let token: [u8; 6] = rand::thread_rng().gen();
    let hex: String = token.iter().map(|b| format!("{:02x}", b)).collect();
    format!("http://{}-{}.{}/ping", prefix, hex, domain)
}

/// Plants a canary URL in SSRF-prone parameters. Hits are observed on the
/// canary domain, outside this process.
pub struct OobSsrfCheck {
    fetcher: Arc<BoundedFetcher>,
    reporter: Arc<dyn ReportSink>,
    domain: String,
    prefix: String,
}

impl OobSsrfCheck {
    pub fn new(
        fetcher: Arc<BoundedFetcher>,
        reporter: Arc<dyn ReportSink>,
        domain: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self { fetcher, reporter, domain: domain.into(), prefix: prefix.into() }
    }

    async fn probe(&self, endpoint: &str) -> anyhow::Result<()> {
        let base = match Url::parse(endpoint) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => u,
            _ => return Ok(()),
        };
        let canary = canary_url(&self.prefix, &self.domain);

        for key in SSRF_KEYS {
            let test = substitute_query(&base, key, &canary).to_string();
            if let Err(e) = self.fetcher.get(&test).await {
                tracing::debug!(url = %test, error = %e, "oob probe not delivered");
                continue;
            }
            let note = format!("Injected `{}` via `{}`. Watch canary for hits.", canary, key);
            let rec = RawRecord::new("SSRF (OOB probe queued)", &test, note).with_curl(format!("curl -i '{}'", test));
            self.reporter.record(rec).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CheckModule for OobSsrfCheck {
    fn kind(&self) -> ModuleKind {
        ModuleKind::OobSsrf
    }

    async fn run(&self, endpoints: &[String]) -> anyhow::Result<()> {
        for res in join_all(endpoints.iter().map(|e| self.probe(e))).await {
            res?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canary_shape() {
        let a = canary_url("bh-ssrf", "oob.test");
        let b = canary_url("bh-ssrf", "oob.test");
        assert_ne!(a, b);
        let host = Url::parse(&a).unwrap().host_str().unwrap().to_string();
        let label = host.strip_suffix(".oob.test").unwrap();
        let token = label.strip_prefix("bh-ssrf-").unwrap();
        assert_eq!(token.len(), 12);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(a.ends_with("/ping"));
    }
}
