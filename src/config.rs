use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Prefix for environment overrides, e.g. `BH_MAX_CONCURRENCY=40`.
pub const ENV_PREFIX: &str = "BH_";

/// Upper bound accepted for `RETRIES`.
pub const MAX_RETRIES: u32 = 9;

/// Check modules the scheduler can run over a chunk, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKind {
    Fuzz,
    Redirects,
    Auth,
    SignedUrls,
    Jwt,
    AccessControl,
    Fingerprint,
    OobSsrf,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 8] = [
        ModuleKind::Fuzz,
        ModuleKind::Redirects,
        ModuleKind::Auth,
        ModuleKind::SignedUrls,
        ModuleKind::Jwt,
        ModuleKind::AccessControl,
        ModuleKind::Fingerprint,
        ModuleKind::OobSsrf,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModuleKind::Fuzz => "fuzz",
            ModuleKind::Redirects => "redirects",
            ModuleKind::Auth => "auth",
            ModuleKind::SignedUrls => "signed-urls",
            ModuleKind::Jwt => "jwt",
            ModuleKind::AccessControl => "access-control",
            ModuleKind::Fingerprint => "fingerprint",
            ModuleKind::OobSsrf => "oob-ssrf",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModuleKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        ModuleKind::ALL
            .into_iter()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| ConfigError::Invalid {
                key: "MODULES",
                reason: format!("unknown module '{}'", s),
            })
    }
}

/// Per-run module switches. Everything is on by default except the
/// out-of-band SSRF module, which follows `OOB_ENABLED` unless set here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleToggles {
    pub fuzz: bool,
    pub redirects: bool,
    pub auth: bool,
    pub signed_urls: bool,
    pub jwt: bool,
    pub access_control: bool,
    pub fingerprint: bool,
    pub oob_ssrf: Option<bool>,
}

impl Default for ModuleToggles {
    fn default() -> Self {
        Self {
            fuzz: true,
            redirects: true,
            auth: true,
            signed_urls: true,
            jwt: true,
            access_control: true,
            fingerprint: true,
            oob_ssrf: None,
        }
    }
}

impl ModuleToggles {
    pub fn is_enabled(&self, kind: ModuleKind, oob_default: bool) -> bool {
        match kind {
            ModuleKind::Fuzz => self.fuzz,
            ModuleKind::Redirects => self.redirects,
            ModuleKind::Auth => self.auth,
            ModuleKind::SignedUrls => self.signed_urls,
            ModuleKind::Jwt => self.jwt,
            ModuleKind::AccessControl => self.access_control,
            ModuleKind::Fingerprint => self.fingerprint,
            ModuleKind::OobSsrf => self.oob_ssrf.unwrap_or(oob_default),
        }
    }

    pub fn set(&mut self, kind: ModuleKind, on: bool) {
        match kind {
            ModuleKind::Fuzz => self.fuzz = on,
            ModuleKind::Redirects => self.redirects = on,
            ModuleKind::Auth => self.auth = on,
            ModuleKind::SignedUrls => self.signed_urls = on,
            ModuleKind::Jwt => self.jwt = on,
            ModuleKind::AccessControl => self.access_control = on,
            ModuleKind::Fingerprint => self.fingerprint = on,
            ModuleKind::OobSsrf => self.oob_ssrf = Some(on),
        }
    }
}

/// Extra headers and cookies sent when acting as a given role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleSession {
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Settings {
    pub max_concurrency: usize,
    pub per_host: usize,
    pub timeout_s: f64,
    pub retries: u32,
    pub max_response_size: usize,
    pub max_redirect_depth: usize,
    pub allowed_hosts: Vec<String>,
    pub jitter_s: f64,
    pub pacing: bool,
    pub random_ua: bool,
    pub confidence_threshold: f64,
    pub response_time_threshold: f64,
    pub chunk_size: usize,
    pub workers: usize,
    pub queue_pop_timeout_s: f64,
    pub modules: ModuleToggles,
    pub oob_enabled: bool,
    pub canary_domain: Option<String>,
    pub canary_label_prefix: String,
    pub user_roles: BTreeMap<String, RoleSession>,
    pub role_tokens: BTreeMap<String, String>,
    pub cve_favicon_db: Option<PathBuf>,
    pub llm_provider: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub program: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrency: 20,
            per_host: 5,
            timeout_s: 15.0,
            retries: 1,
            max_response_size: 2 * 1024 * 1024,
            max_redirect_depth: 5,
            allowed_hosts: Vec::new(),
            jitter_s: 0.25,
            pacing: true,
            random_ua: true,
            confidence_threshold: 0.0,
            response_time_threshold: 5.0,
            chunk_size: 25,
            workers: 4,
            queue_pop_timeout_s: 1.0,
            modules: ModuleToggles::default(),
            oob_enabled: false,
            canary_domain: None,
            canary_label_prefix: "bh-ssrf".to_string(),
            user_roles: BTreeMap::new(),
            role_tokens: BTreeMap::new(),
            cve_favicon_db: None,
            llm_provider: "none".to_string(),
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            program: "Program".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, then the optional JSON file, then `BH_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        serde_json::from_str(&data).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Apply scalar overrides from a key lookup (keys without prefix).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parse(&lookup, "MAX_CONCURRENCY", &mut self.max_concurrency)?;
        override_parse(&lookup, "PER_HOST", &mut self.per_host)?;
        override_parse(&lookup, "TIMEOUT_S", &mut self.timeout_s)?;
        override_parse(&lookup, "RETRIES", &mut self.retries)?;
        override_parse(&lookup, "MAX_RESPONSE_SIZE", &mut self.max_response_size)?;
        override_parse(&lookup, "MAX_REDIRECT_DEPTH", &mut self.max_redirect_depth)?;
        override_parse(&lookup, "JITTER_S", &mut self.jitter_s)?;
        override_parse(&lookup, "PACING", &mut self.pacing)?;
        override_parse(&lookup, "RANDOM_UA", &mut self.random_ua)?;
        override_parse(&lookup, "CONFIDENCE_THRESHOLD", &mut self.confidence_threshold)?;
        override_parse(&lookup, "RESPONSE_TIME_THRESHOLD", &mut self.response_time_threshold)?;
        override_parse(&lookup, "CHUNK_SIZE", &mut self.chunk_size)?;
        override_parse(&lookup, "WORKERS", &mut self.workers)?;
        override_parse(&lookup, "QUEUE_POP_TIMEOUT_S", &mut self.queue_pop_timeout_s)?;
        override_parse(&lookup, "OOB_ENABLED", &mut self.oob_enabled)?;

        if let Some(hosts) = lookup("ALLOWED_HOSTS") {
            self.allowed_hosts = hosts
                .split(',')
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if let Some(v) = lookup("CANARY_DOMAIN") {
            self.canary_domain = Some(v);
        }
        if let Some(v) = lookup("CANARY_LABEL_PREFIX") {
            self.canary_label_prefix = v;
        }
        if let Some(v) = lookup("CVE_FAVICON_DB") {
            self.cve_favicon_db = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("LLM_PROVIDER") {
            self.llm_provider = v;
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.openai_api_key = Some(v);
        }
        if let Some(v) = lookup("OPENAI_MODEL") {
            self.openai_model = v;
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            self.openai_base_url = v;
        }
        if let Some(v) = lookup("PROGRAM") {
            self.program = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &'static str, reason: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid { key, reason: reason.to_string() })
        }

        if self.max_concurrency == 0 {
            return invalid("MAX_CONCURRENCY", "must be at least 1");
        }
        if self.per_host == 0 {
            return invalid("PER_HOST", "must be at least 1");
        }
        if self.retries > MAX_RETRIES {
            return invalid("RETRIES", "must be at most 9");
        }
        if !(self.timeout_s.is_finite() && self.timeout_s > 0.0) {
            return invalid("TIMEOUT_S", "must be a positive number of seconds");
        }
        if !(self.jitter_s.is_finite() && self.jitter_s >= 0.0) {
            return invalid("JITTER_S", "must be zero or positive");
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return invalid("CONFIDENCE_THRESHOLD", "must be within [0, 1]");
        }
        if !(self.response_time_threshold.is_finite() && self.response_time_threshold > 0.0) {
            return invalid("RESPONSE_TIME_THRESHOLD", "must be positive");
        }
        if self.chunk_size == 0 {
            return invalid("CHUNK_SIZE", "must be at least 1");
        }
        if self.workers == 0 {
            return invalid("WORKERS", "must be at least 1");
        }
        if !(self.queue_pop_timeout_s.is_finite() && self.queue_pop_timeout_s > 0.0) {
            return invalid("QUEUE_POP_TIMEOUT_S", "must be positive");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_s)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_secs_f64(self.jitter_s)
    }

    pub fn response_time_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.response_time_threshold)
    }

    pub fn queue_pop_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.queue_pop_timeout_s)
    }

    pub fn module_enabled(&self, kind: ModuleKind) -> bool {
        self.modules.is_enabled(kind, self.oob_enabled)
    }

    /// Enabled modules in pipeline order.
    pub fn enabled_modules(&self) -> Vec<ModuleKind> {
        ModuleKind::ALL.into_iter().filter(|k| self.module_enabled(*k)).collect()
    }
}

fn override_parse<T, F>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *slot = raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}
