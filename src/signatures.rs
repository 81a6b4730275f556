//! Response indicators per vulnerability class.
//!
//! Tables are compiled once and shared by reference; nothing here is mutated
//! after construction.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureKind {
    Xss,
    SqliError,
    Ssti,
    Ssrf,
}

impl SignatureKind {
    pub const ALL: [SignatureKind; 4] = [
        SignatureKind::Xss,
        SignatureKind::SqliError,
        SignatureKind::Ssti,
        SignatureKind::Ssrf,
    ];
}

/// Sentinel reflected by the XSS probes.
pub const XSS_SENTINEL: &str = "BHXSS";
/// Sentinel reflected by the template-injection probes.
pub const SSTI_SENTINEL: &str = "BHSTI";

const XSS_PATTERNS: &[&str] = &[
    r"BHXSS",
    r"<script[^>]*>BHXSS</script>",
    r"onerror=BHXSS",
    r#""BHXSS""#,
];

const SQLI_ERRORS: &[&str] = &[
    r"SQL syntax",
    r"mysql_fetch|PDO|mysqli|ORA-\d+|PostgreSQL|SQLite",
    r"SQLSTATE\[HY000\]",
    r"UNION(?:\s+ALL)?\s+SELECT",
];

const SSTI_PATTERNS: &[&str] = &[
    r"BHSTI",
    r"7\s*\*\s*7",
    r"\{\{\s*7\s*\*\s*7\s*\}\}",
];

const SSRF_MARKERS: &[&str] = &[
    r"169\.254\.169\.254",
    r"127\.0\.0\.1",
    r"localhost",
];

/// Responses slower than this are a weak time-based SQLi hint.
pub const DEFAULT_RESPONSE_TIME_THRESHOLD: Duration = Duration::from_secs(5);

static STANDARD: Lazy<SignatureSet> = Lazy::new(|| {
    SignatureSet::from_patterns(XSS_PATTERNS, SQLI_ERRORS, SSTI_PATTERNS, SSRF_MARKERS)
        .expect("built-in signature patterns compile")
});

#[derive(Debug, Clone)]
pub struct SignatureSet {
    xss: Vec<Regex>,
    sqli: Vec<Regex>,
    ssti: Vec<Regex>,
    ssrf: Vec<Regex>,
    slow_threshold: Duration,
}

impl SignatureSet {
    /// The built-in tables with the default timing threshold.
    pub fn standard() -> Self {
        STANDARD.clone()
    }

    pub fn from_patterns(
        xss: &[&str],
        sqli: &[&str],
        ssti: &[&str],
        ssrf: &[&str],
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            xss: compile(xss)?,
            sqli: compile(sqli)?,
            ssti: compile(ssti)?,
            ssrf: compile(ssrf)?,
            slow_threshold: DEFAULT_RESPONSE_TIME_THRESHOLD,
        })
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    fn table(&self, kind: SignatureKind) -> &[Regex] {
        match kind {
            SignatureKind::Xss => &self.xss,
            SignatureKind::SqliError => &self.sqli,
            SignatureKind::Ssti => &self.ssti,
            SignatureKind::Ssrf => &self.ssrf,
        }
    }

    /// A kind hits when any of its patterns matches (case-insensitive).
    pub fn matches(&self, kind: SignatureKind, text: &str) -> bool {
        self.table(kind).iter().any(|re| re.is_match(text))
    }

    /// First matching excerpt, for evidence.
    pub fn first_match<'t>(&self, kind: SignatureKind, text: &'t str) -> Option<&'t str> {
        self.table(kind).iter().find_map(|re| re.find(text).map(|m| m.as_str()))
    }

    pub fn is_slow(&self, elapsed: Duration) -> bool {
        elapsed > self.slow_threshold
    }
}

fn compile(patterns: &[&str]) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
        .collect()
}
