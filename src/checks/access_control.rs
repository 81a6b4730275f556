//! Vertical and horizontal privilege checks driven by per-role bearer tokens.
//!
//! Vertical: a non-admin role reaching an admin-looking path. Horizontal: a
//! role reading another role's per-user resource, with user ids taken from
//! the token claims.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::checks::jwt::{bearer_curl, subject_id};
use crate::config::ModuleKind;
use crate::probe::fetch::{BoundedFetcher, FetchRequest};
use crate::report::{RawRecord, ReportSink};
use crate::scheduler::CheckModule;
use crate::utils::unique_roots;

pub const ADMIN_GUESSES: &[&str] = &["/admin", "/dashboard", "/manage", "/settings", "/api/admin"];

pub const USER_TEMPLATES: &[&str] = &[
    "/api/users/{id}",
    "/users/{id}",
    "/api/user/{id}",
    "/user/{id}",
    "/account/{id}",
    "/profile/{id}",
];

pub struct AccessControlCheck {
    fetcher: Arc<BoundedFetcher>,
    reporter: Arc<dyn ReportSink>,
    role_tokens: BTreeMap<String, String>,
}

impl AccessControlCheck {
    pub fn new(
        fetcher: Arc<BoundedFetcher>,
        reporter: Arc<dyn ReportSink>,
        role_tokens: BTreeMap<String, String>,
    ) -> Self {
        Self { fetcher, reporter, role_tokens }
    }

    async fn status_as(&self, url: &str, token: &str) -> Option<u16> {
        let req = FetchRequest::get(url)
            .header("Authorization", format!("Bearer {}", token))
            .no_redirects();
        match self.fetcher.fetch(req).await {
            Ok(r) => Some(r.status),
            Err(e) => {
                tracing::debug!(url, error = %e, "access control probe failed");
                None
            }
        }
    }

    async fn vertical(&self, root: &str) -> anyhow::Result<()> {
        for path in ADMIN_GUESSES {
            let url = format!("{}{}", root, path);
            for (role, token) in self.role_tokens.iter().filter(|(r, _)| !r.eq_ignore_ascii_case("admin")) {
                let Some(status) = self.status_as(&url, token).await else {
                    continue;
                };
                if status < 400 {
                    let rec = RawRecord::new(
                        "Potential Vertical Privilege Escalation",
                        &url,
                        format!("Role '{}' accessed admin path {} (status {})", role, path, status),
                    )
                    .with_curl(bearer_curl(token, &url));
                    self.reporter.record(rec).await?;
                }
            }
        }
        Ok(())
    }

    async fn horizontal(&self, root: &str) -> anyhow::Result<()> {
        let ids: Vec<(&str, &str, String)> = self
            .role_tokens
            .iter()
            .filter_map(|(role, token)| subject_id(token).map(|id| (role.as_str(), token.as_str(), id)))
            .collect();
        if ids.len() < 2 {
            return Ok(());
        }

        for template in USER_TEMPLATES {
            for (role, token, own_id) in &ids {
                for (other_role, _, other_id) in ids.iter().filter(|(r, _, _)| r != role) {
                    if other_id == own_id {
                        continue;
                    }
                    let url = format!("{}{}", root, template.replace("{id}", other_id));
                    let Some(status) = self.status_as(&url, token).await else {
                        continue;
                    };
                    if status < 400 {
                        let rec = RawRecord::new(
                            "Potential Horizontal Privilege Escalation",
                            &url,
                            format!(
                                "Role '{}' (id {}) accessed resource of '{}' (id {}), status {}",
                                role, own_id, other_role, other_id, status
                            ),
                        )
                        .with_curl(bearer_curl(token, &url));
                        self.reporter.record(rec).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CheckModule for AccessControlCheck {
    fn kind(&self) -> ModuleKind {
        ModuleKind::AccessControl
    }

    async fn run(&self, endpoints: &[String]) -> anyhow::Result<()> {
        if self.role_tokens.is_empty() {
            tracing::debug!("no role tokens configured, skipping access control");
            return Ok(());
        }
        let roots = unique_roots(endpoints);
        let work = roots.iter().map(|root| async move {
            self.vertical(root).await?;
            self.horizontal(root).await
        });
        for res in join_all(work).await {
            res?;
        }
        Ok(())
    }
}
