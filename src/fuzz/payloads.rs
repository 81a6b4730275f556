//! Static probe catalog.
//!
//! Probes carry the `BHXSS` / `BHSTI` sentinels so reflections are
//! unambiguous. Nothing here is destructive: the SQLi set only provokes
//! parser errors or short sleeps.

use std::fmt;

/// Probe category. `LlmVariant` probes are checked against every signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeCategory {
    Xss,
    Sqli,
    Ssti,
    Ssrf,
    LlmVariant,
}

impl ProbeCategory {
    /// Order of the deterministic passes.
    pub const STATIC: [ProbeCategory; 4] = [
        ProbeCategory::Xss,
        ProbeCategory::Sqli,
        ProbeCategory::Ssti,
        ProbeCategory::Ssrf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeCategory::Xss => "XSS",
            ProbeCategory::Sqli => "SQLi",
            ProbeCategory::Ssti => "SSTI",
            ProbeCategory::Ssrf => "SSRF",
            ProbeCategory::LlmVariant => "LLM-variant",
        }
    }
}

impl fmt::Display for ProbeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const XSS_PROBES: &[&str] = &[
    "BHXSS",
    "<script>BHXSS</script>",
    "\"><img src=x onerror=BHXSS>",
    "'\"><svg/onload=BHXSS>",
];

pub const SQLI_PROBES: &[&str] = &[
    "'",
    "\"",
    "1' OR '1'='1",
    "1 AND SLEEP(6)",
    "1';WAITFOR DELAY '0:0:6'--",
];

pub const SSTI_PROBES: &[&str] = &[
    "{{7*7}}BHSTI",
    "${7*7}BHSTI",
    "<%= 7*7 %>BHSTI",
    "#{7*7}BHSTI",
];

pub const SSRF_PROBES: &[&str] = &[
    "http://169.254.169.254/latest/meta-data/",
    "http://127.0.0.1/",
    "http://localhost/",
];

/// Query keys substituted by every probe.
pub const COMMON_KEYS: &[&str] = &[
    "q", "s", "search", "query", "id", "page", "url", "redirect", "next", "file", "path", "name",
];

/// Header sets sent as-is during the header stage.
pub const HEADER_MUTATIONS: &[&[(&str, &str)]] = &[
    &[("X-Forwarded-Host", "bhxss.example")],
    &[("X-Original-URL", "/{{7*7}}BHSTI")],
    &[("X-Forwarded-For", "127.0.0.1")],
];

/// Probe sets per category plus the keys and header sets they are applied
/// with. `standard()` is what scans use; tests narrow it down.
#[derive(Debug, Clone)]
pub struct ProbeCatalog {
    pub xss: Vec<String>,
    pub sqli: Vec<String>,
    pub ssti: Vec<String>,
    pub ssrf: Vec<String>,
    pub keys: Vec<String>,
    pub header_mutations: Vec<Vec<(String, String)>>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl ProbeCatalog {
    pub fn standard() -> Self {
        Self {
            xss: owned(XSS_PROBES),
            sqli: owned(SQLI_PROBES),
            ssti: owned(SSTI_PROBES),
            ssrf: owned(SSRF_PROBES),
            keys: owned(COMMON_KEYS),
            header_mutations: HEADER_MUTATIONS
                .iter()
                .map(|set| set.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
                .collect(),
        }
    }

    /// No probes, standard keys and headers.
    pub fn empty() -> Self {
        Self {
            xss: Vec::new(),
            sqli: Vec::new(),
            ssti: Vec::new(),
            ssrf: Vec::new(),
            ..Self::standard()
        }
    }

    pub fn with_probes(mut self, category: ProbeCategory, probes: &[&str]) -> Self {
        let slot = match category {
            ProbeCategory::Xss => &mut self.xss,
            ProbeCategory::Sqli => &mut self.sqli,
            ProbeCategory::Ssti => &mut self.ssti,
            ProbeCategory::Ssrf => &mut self.ssrf,
            ProbeCategory::LlmVariant => return self,
        };
        *slot = owned(probes);
        self
    }

    pub fn with_keys(mut self, keys: &[&str]) -> Self {
        self.keys = owned(keys);
        self
    }

    pub fn without_header_mutations(mut self) -> Self {
        self.header_mutations.clear();
        self
    }

    pub fn probes(&self, category: ProbeCategory) -> &[String] {
        match category {
            ProbeCategory::Xss => &self.xss,
            ProbeCategory::Sqli => &self.sqli,
            ProbeCategory::Ssti => &self.ssti,
            ProbeCategory::Ssrf => &self.ssrf,
            ProbeCategory::LlmVariant => &[],
        }
    }
}

impl Default for ProbeCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
