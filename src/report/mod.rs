pub mod markdown;
pub mod writer_csv;
pub mod writer_jsonl;

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use markdown::MarkdownReporter;
pub use writer_jsonl::IndexEntry;

/// Evidence excerpts are cut to this many characters.
pub const EVIDENCE_LIMIT: usize = 2000;

/// A scored fuzzing hit. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub category: String,
    pub url: String,
    pub method: String,
    pub evidence: String,
    pub curl: String,
    pub confidence: f64,
}

impl Finding {
    pub fn new(category: impl Into<String>, method: &str, url: &str, evidence: &str, confidence: f64) -> Self {
        Self {
            category: category.into(),
            url: url.to_string(),
            method: method.to_string(),
            evidence: truncate_chars(evidence, EVIDENCE_LIMIT),
            curl: curl_command(method, url),
            confidence,
        }
    }
}

/// Free-form record emitted by check modules that do not score confidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub category: String,
    pub endpoint: String,
    pub evidence: String,
    pub curl: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss_vector: Option<String>,
}

impl RawRecord {
    pub fn new(category: impl Into<String>, endpoint: &str, evidence: impl Into<String>) -> Self {
        let evidence: String = evidence.into();
        Self {
            category: category.into(),
            endpoint: endpoint.to_string(),
            evidence: truncate_chars(&evidence, EVIDENCE_LIMIT),
            curl: curl_command("GET", endpoint),
            ..Default::default()
        }
    }

    pub fn with_curl(mut self, curl: impl Into<String>) -> Self {
        self.curl = curl.into();
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Where findings and records go. Implementations must tolerate concurrent
/// writers.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn write(&self, finding: &Finding) -> anyhow::Result<()>;

    async fn record(&self, record: RawRecord) -> anyhow::Result<()>;

    /// Flush buffered output and write any summary artifacts.
    async fn finish(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps everything in memory. Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryReporter {
    findings: Mutex<Vec<Finding>>,
    records: Mutex<Vec<RawRecord>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn findings(&self) -> Vec<Finding> {
        self.findings.lock().clone()
    }

    pub fn records(&self) -> Vec<RawRecord> {
        self.records.lock().clone()
    }

    pub fn records_in(&self, category: &str) -> Vec<RawRecord> {
        self.records.lock().iter().filter(|r| r.category == category).cloned().collect()
    }
}

#[async_trait]
impl ReportSink for MemoryReporter {
    async fn write(&self, finding: &Finding) -> anyhow::Result<()> {
        self.findings.lock().push(finding.clone());
        Ok(())
    }

    async fn record(&self, record: RawRecord) -> anyhow::Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

pub fn curl_command(method: &str, url: &str) -> String {
    format!("curl -i -X {} '{}'", method, url)
}

/// Lower-case ASCII slug, runs of other characters collapse to one dash.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut dash = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    let mut slug: String = out.chars().take(max_len).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("finding");
    }
    slug
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(
            slugify("Reflected XSS (indicator) https://a.test/search?q=1", 120),
            "reflected-xss-indicator-https-a-test-search-q-1"
        );
        assert_eq!(slugify("Open Redirect", 6), "open-r");
        assert_eq!(slugify("a b", 2), "a");
        assert_eq!(slugify("!!!", 10), "finding");
    }

    #[test]
    fn test_finding_truncates_evidence_and_builds_curl() {
        let body = "x".repeat(EVIDENCE_LIMIT + 50);
        let f = Finding::new("Reflected XSS (indicator)", "GET", "https://a.test/?q=1", &body, 0.9);
        assert_eq!(f.evidence.len(), EVIDENCE_LIMIT);
        assert_eq!(f.curl, "curl -i -X GET 'https://a.test/?q=1'");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("ééé", 2), "éé");
        assert_eq!(truncate_chars("ab", 5), "ab");
    }

    #[tokio::test]
    async fn test_memory_reporter_collects() {
        let r = MemoryReporter::new();
        r.write(&Finding::new("X", "GET", "https://a.test/", "e", 0.4)).await.unwrap();
        r.record(RawRecord::new("Open Redirect", "https://a.test/", "loc")).await.unwrap();
        assert_eq!(r.findings().len(), 1);
        assert_eq!(r.records_in("Open Redirect").len(), 1);
        assert!(r.records_in("Other").is_empty());
    }
}
