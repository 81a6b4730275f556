use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use url::Url;

use crate::config::ModuleKind;
use crate::probe::fetch::{BoundedFetcher, FetchRequest};
use crate::report::{RawRecord, ReportSink};
use crate::scheduler::CheckModule;
use crate::utils::substitute_query;

pub const REDIRECT_KEYS: &[&str] = &["next", "url", "redirect", "return", "r", "dest", "to"];
pub const REDIRECT_PAYLOADS: &[&str] = &["https://evil.example/", "//evil.example/", "\\evil.example/"];
const EVIL_HOST: &str = "evil.example";

/// True when a `Location` value would send a browser to the probe host.
/// Protocol-relative and backslash forms count.
pub fn points_offsite(location: &str) -> bool {
    let loc = location.trim().replace('\\', "/").to_ascii_lowercase();
    let rest = if let Some(r) = loc.strip_prefix("https://").or_else(|| loc.strip_prefix("http://")) {
        r
    } else if let Some(r) = loc.strip_prefix("//") {
        r
    } else {
        return false;
    };
    let host = rest.split(['/', '?', '#', ':']).next().unwrap_or_default();
    host == EVIL_HOST || host.ends_with(".evil.example")
}

pub struct RedirectCheck {
    fetcher: Arc<BoundedFetcher>,
    reporter: Arc<dyn ReportSink>,
}

impl RedirectCheck {
    pub fn new(fetcher: Arc<BoundedFetcher>, reporter: Arc<dyn ReportSink>) -> Self {
        Self { fetcher, reporter }
    }

    async fn check(&self, endpoint: &str) -> anyhow::Result<()> {
        let base = match Url::parse(endpoint) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => u,
            _ => return Ok(()),
        };

        for key in REDIRECT_KEYS {
            for payload in REDIRECT_PAYLOADS {
                let test = substitute_query(&base, key, payload).to_string();
                let resp = match self.fetcher.fetch(FetchRequest::get(test.as_str()).no_redirects()).await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!(url = %test, error = %e, "redirect probe failed");
                        continue;
                    }
                };
                let Some(loc) = resp.location() else {
                    continue;
                };
                if resp.is_redirect() && points_offsite(loc) {
                    let rec = RawRecord::new("Open Redirect", &test, format!("Open redirect via `{}` -> `{}`", key, loc))
                        .with_curl(format!("curl -i '{}'", test));
                    self.reporter.record(rec).await?;
                    break;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CheckModule for RedirectCheck {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Redirects
    }

    async fn run(&self, endpoints: &[String]) -> anyhow::Result<()> {
        for res in join_all(endpoints.iter().map(|e| self.check(e))).await {
            res?;
        }
        Ok(())
    }
}
