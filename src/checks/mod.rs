//! Check modules run by the scheduler over each chunk of endpoints.

pub mod access_control;
pub mod auth;
pub mod fingerprint;
pub mod fuzz;
pub mod jwt;
pub mod oob_ssrf;
pub mod redirects;
pub mod signed_urls;

use std::sync::Arc;

use crate::advice::AdviceSource;
use crate::config::{ModuleKind, Settings};
use crate::fuzz::FuzzCoordinator;
use crate::probe::fetch::BoundedFetcher;
use crate::report::ReportSink;
use crate::scheduler::CheckModule;

pub use access_control::AccessControlCheck;
pub use auth::AuthCheck;
pub use fingerprint::{FaviconDb, FingerprintCheck};
pub use fuzz::FuzzModule;
pub use jwt::JwtCheck;
pub use oob_ssrf::OobSsrfCheck;
pub use redirects::RedirectCheck;
pub use signed_urls::SignedUrlCheck;

/// The enabled modules, in pipeline order.
pub fn build_modules(
    settings: &Settings,
    fetcher: Arc<BoundedFetcher>,
    reporter: Arc<dyn ReportSink>,
    advice: Arc<dyn AdviceSource>,
) -> Vec<Arc<dyn CheckModule>> {
    let mut modules: Vec<Arc<dyn CheckModule>> = Vec::new();
    for kind in settings.enabled_modules() {
        let f = fetcher.clone();
        let r = reporter.clone();
        let module: Arc<dyn CheckModule> = match kind {
            ModuleKind::Fuzz => Arc::new(FuzzModule::new(FuzzCoordinator::from_settings(
                settings,
                f,
                r,
                advice.clone(),
            ))),
            ModuleKind::Redirects => Arc::new(RedirectCheck::new(f, r)),
            ModuleKind::Auth => Arc::new(AuthCheck::new(f, r, &settings.user_roles)),
            ModuleKind::SignedUrls => Arc::new(SignedUrlCheck::new(f, r)),
            ModuleKind::Jwt => Arc::new(JwtCheck::new(f, r, settings.role_tokens.clone())),
            ModuleKind::AccessControl => Arc::new(AccessControlCheck::new(f, r, settings.role_tokens.clone())),
            ModuleKind::Fingerprint => {
                let db = FaviconDb::load(settings.cve_favicon_db.as_deref());
                Arc::new(FingerprintCheck::new(f, r, db))
            }
            ModuleKind::OobSsrf => match settings.canary_domain.as_deref().map(str::trim) {
                Some(domain) if !domain.is_empty() => {
                    Arc::new(OobSsrfCheck::new(f, r, domain, settings.canary_label_prefix.as_str()))
                }
                _ => {
                    tracing::warn!("oob-ssrf enabled without CANARY_DOMAIN, skipping");
                    continue;
                }
            },
        };
        modules.push(module);
    }
    tracing::info!(
        modules = %modules.iter().map(|m| m.kind().name()).collect::<Vec<_>>().join(","),
        "check modules ready"
    );
    modules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::NoAdvice;
    use crate::report::MemoryReporter;

    fn build(settings: &Settings) -> Vec<ModuleKind> {
        let fetcher = Arc::new(BoundedFetcher::new(settings).unwrap());
        let reporter: Arc<dyn ReportSink> = Arc::new(MemoryReporter::new());
        build_modules(settings, fetcher, reporter, Arc::new(NoAdvice))
            .iter()
            .map(|m| m.kind())
            .collect()
    }

    #[test]
    fn test_defaults_exclude_oob() {
        let kinds = build(&Settings::default());
        assert_eq!(kinds.len(), 7);
        assert!(!kinds.contains(&ModuleKind::OobSsrf));
        assert!(kinds.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_oob_needs_canary_domain() {
        let mut s = Settings::default();
        s.oob_enabled = true;
        assert!(!build(&s).contains(&ModuleKind::OobSsrf));
        s.canary_domain = Some("oob.test".into());
        assert!(build(&s).contains(&ModuleKind::OobSsrf));
    }

    #[test]
    fn test_disabled_modules_are_left_out() {
        let mut s = Settings::default();
        s.modules.set(ModuleKind::Fuzz, false);
        s.modules.set(ModuleKind::Jwt, false);
        let kinds = build(&s);
        assert!(!kinds.contains(&ModuleKind::Fuzz));
        assert!(!kinds.contains(&ModuleKind::Jwt));
        assert!(kinds.contains(&ModuleKind::Redirects));
    }
}
