//! Admin-path exposure, CORS credential leaks and per-session response
//! discrepancies.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ahash::AHashSet;
use async_trait::async_trait;
use futures::future::join_all;

use crate::config::{ModuleKind, RoleSession};
use crate::probe::fetch::{BoundedFetcher, FetchRequest};
use crate::report::{RawRecord, ReportSink};
use crate::scheduler::CheckModule;
use crate::utils::unique_roots;

pub const ADMIN_PATHS: &[&str] = &[
    "/admin",
    "/admin/",
    "/dashboard",
    "/manage",
    "/settings",
    "/account",
    "/wp-admin/",
    "/cms/",
];

const DESKTOP_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

/// Origin sent with every request so reflected-origin CORS can be seen.
pub const PROBE_ORIGIN: &str = "https://bh-origin.example";

const LOGIN_MARKERS: &[&str] = &["login", "sign in", "signin", "log in"];

#[derive(Debug, Clone)]
pub struct Session {
    pub name: String,
    pub headers: Vec<(String, String)>,
}

impl Session {
    fn user_agent(&self) -> &str {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }
}

/// Anonymous plus every configured role, each with a desktop and a mobile
/// browser profile. Role headers win over the profile's.
pub fn build_sessions(roles: &BTreeMap<String, RoleSession>) -> Vec<Session> {
    let anon = RoleSession::default();
    let all = std::iter::once(("anon", &anon)).chain(roles.iter().map(|(k, v)| (k.as_str(), v)));

    let mut sessions = Vec::new();
    for (role, data) in all {
        for (profile, ua) in [("desktop", DESKTOP_UA), ("mobile", MOBILE_UA)] {
            let mut headers: Vec<(String, String)> = Vec::new();
            if !data.headers.keys().any(|k| k.eq_ignore_ascii_case("user-agent")) {
                headers.push(("User-Agent".into(), ua.into()));
            }
            headers.extend(data.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
            if !data.cookies.is_empty() {
                let cookie = data
                    .cookies
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join("; ");
                headers.push(("Cookie".into(), cookie));
            }
            sessions.push(Session { name: format!("{}-{}", role, profile), headers });
        }
    }
    sessions
}

pub fn has_login_markers(body: &str) -> bool {
    let lower = body.to_lowercase();
    LOGIN_MARKERS.iter().any(|m| lower.contains(m))
}

/// Credentialed CORS for any origin or for the probe origin.
pub fn cors_misconfigured(headers: &HashMap<String, String>) -> Option<String> {
    let allow_origin = headers.get("access-control-allow-origin")?;
    let allow_credentials = headers
        .get("access-control-allow-credentials")
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if !allow_credentials {
        return None;
    }
    let origin = allow_origin.trim();
    if origin == "*" || origin.eq_ignore_ascii_case(PROBE_ORIGIN) || origin == "null" {
        Some(format!("CORS misconfig: ACAO='{}', ACAC='true'", origin))
    } else {
        None
    }
}

pub struct AuthCheck {
    fetcher: Arc<BoundedFetcher>,
    reporter: Arc<dyn ReportSink>,
    sessions: Vec<Session>,
}

impl AuthCheck {
    pub fn new(
        fetcher: Arc<BoundedFetcher>,
        reporter: Arc<dyn ReportSink>,
        roles: &BTreeMap<String, RoleSession>,
    ) -> Self {
        Self { fetcher, reporter, sessions: build_sessions(roles) }
    }

    async fn check_root(&self, root: &str) -> anyhow::Result<()> {
        for path in ADMIN_PATHS {
            let url = format!("{}{}", root, path);
            let mut results: Vec<(&str, u16, usize)> = Vec::new();
            let mut reported: AHashSet<&'static str> = AHashSet::new();

            for sess in &self.sessions {
                let req = FetchRequest::get(url.as_str())
                    .headers(sess.headers.iter().cloned())
                    .header("Origin", PROBE_ORIGIN)
                    .no_redirects();
                let resp = match self.fetcher.fetch(req).await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!(url = %url, session = %sess.name, error = %e, "auth probe failed");
                        continue;
                    }
                };
                results.push((sess.name.as_str(), resp.status, resp.body.len()));
                let curl = format!("curl -i '{}' -H 'User-Agent: {}'", url, sess.user_agent());

                if resp.status == 200 && !has_login_markers(&resp.body) && reported.insert("bypass") {
                    let ev = format!(
                        "HTTP {} to admin path without login markers for {}",
                        resp.status, sess.name
                    );
                    self.reporter
                        .record(RawRecord::new("Auth Bypass (heuristic)", &url, ev).with_curl(curl.clone()))
                        .await?;
                }

                if let Some(ev) = cors_misconfigured(&resp.headers) {
                    if reported.insert("cors") {
                        let curl = format!("{} -H 'Origin: {}'", curl, PROBE_ORIGIN);
                        self.reporter
                            .record(RawRecord::new("CORS Misconfiguration", &url, ev).with_curl(curl))
                            .await?;
                    }
                }
            }

            if results.len() > 1 {
                let distinct: AHashSet<(u16, usize)> = results.iter().map(|(_, s, l)| (*s, *l)).collect();
                if distinct.len() > 1 {
                    let evidence = results
                        .iter()
                        .map(|(name, status, len)| format!("{}:{}:{}B", name, status, len))
                        .collect::<Vec<_>>()
                        .join(" | ");
                    let rec = RawRecord::new("Authorization discrepancy", &url, evidence)
                        .with_curl(format!("curl -i '{}'", url));
                    self.reporter.record(rec).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CheckModule for AuthCheck {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Auth
    }

    async fn run(&self, endpoints: &[String]) -> anyhow::Result<()> {
        let roots = unique_roots(endpoints);
        for res in join_all(roots.iter().map(|r| self.check_root(r))).await {
            res?;
        }
        Ok(())
    }
}
