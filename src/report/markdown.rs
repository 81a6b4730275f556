use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::writer_csv::write_csv;
use super::writer_jsonl::{read_jsonl, spawn_jsonl_writer, IndexEntry};
use super::{slugify, truncate_chars, Finding, RawRecord, ReportSink};
use crate::advice::AdviceSource;

const SLUG_LEN: usize = 120;
const JSONL_FILE: &str = "findings.jsonl";
const INDEX_FILE: &str = "INDEX.md";
const CSV_FILE: &str = "findings.csv";

/// Writes one markdown file per finding or record into the output
/// directory, streams every entry to `findings.jsonl` and, on `finish`,
/// renders `INDEX.md` and `findings.csv`.
pub struct MarkdownReporter {
    dir: PathBuf,
    program: String,
    advice: Option<Arc<dyn AdviceSource>>,
    index: Mutex<BTreeMap<String, IndexEntry>>,
    tx: Mutex<Option<mpsc::Sender<IndexEntry>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl MarkdownReporter {
    /// Must be called inside a tokio runtime: the JSONL writer is spawned
    /// here. Entries from an earlier run in the same directory are kept in
    /// the index.
    pub fn new(dir: &Path, program: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating report dir {}", dir.display()))?;
        let jsonl = dir.join(JSONL_FILE);
        let index: BTreeMap<String, IndexEntry> = read_jsonl(&jsonl)
            .into_iter()
            .map(|e| (e.filename.clone(), e))
            .collect();

        let (tx, rx) = mpsc::channel(256);
        let writer = spawn_jsonl_writer(jsonl, rx);

        Ok(Self {
            dir: dir.to_path_buf(),
            program: program.to_string(),
            advice: None,
            index: Mutex::new(index),
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Ask the advice source for an impact paragraph on each finding.
    pub fn with_advice(mut self, advice: Arc<dyn AdviceSource>) -> Self {
        self.advice = Some(advice);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn emit(&self, entry: IndexEntry, markdown: String) -> anyhow::Result<()> {
        let path = self.dir.join(&entry.filename);
        tokio::fs::write(&path, markdown)
            .await
            .with_context(|| format!("writing {}", path.display()))?;

        self.index.lock().insert(entry.filename.clone(), entry.clone());
        let tx = self.tx.lock().clone();
        if let Some(tx) = tx {
            if tx.send(entry).await.is_err() {
                tracing::warn!("jsonl writer stopped; entry kept in index only");
            }
        }
        Ok(())
    }

    fn render_index(&self, entries: &[&IndexEntry]) -> String {
        let mut out = format!("# Findings Index - {}\n\n", self.program);
        for e in entries {
            out.push_str(&format!("- [{}]({}) - {}\n", e.name, e.filename, e.category));
        }
        out
    }
}

#[async_trait]
impl ReportSink for MarkdownReporter {
    async fn write(&self, finding: &Finding) -> anyhow::Result<()> {
        let name = slugify(&format!("{} {}", finding.category, finding.url), SLUG_LEN);
        let impact = match &self.advice {
            Some(a) => {
                let ctx = format!(
                    "URL: {}\nMethod: {}\nEvidence:\n{}",
                    finding.url,
                    finding.method,
                    truncate_chars(&finding.evidence, 1000)
                );
                a.summarize_risk(&ctx).await
            }
            None => None,
        };

        let md = format!(
            "# {category}\n\n\
             **Program:** {program}  \n\
             **Endpoint:** `{url}`  \n\
             **Method:** `{method}`  \n\
             **Confidence:** {confidence:.2}\n\n\
             ## Proof of Concept\n```bash\n{curl}\n```\n\n\
             ## Evidence (Truncated)\n```\n{evidence}\n```\n\n\
             ## Impact (Concise)\n{impact}\n\n\
             ## Remediation Hints\n\
             - Sanitize inputs, parameterize queries, encode output.\n\
             - Harden SSRF with allowlists and metadata protections.\n",
            category = finding.category,
            program = self.program,
            url = finding.url,
            method = finding.method,
            confidence = finding.confidence,
            curl = finding.curl,
            evidence = finding.evidence,
            impact = impact.as_deref().unwrap_or("Pending triage."),
        );

        let entry = IndexEntry {
            filename: format!("{}.md", name),
            name,
            category: finding.category.clone(),
            endpoint: finding.url.clone(),
            method: Some(finding.method.clone()),
            confidence: Some(finding.confidence),
            curl: finding.curl.clone(),
            evidence: finding.evidence.clone(),
        };
        self.emit(entry, md).await
    }

    async fn record(&self, record: RawRecord) -> anyhow::Result<()> {
        let name = slugify(&format!("{} {}", record.category, record.endpoint), SLUG_LEN);
        let mut md = format!(
            "# {}\n\n**Program:** {}  \n**Endpoint:** `{}`\n\n## Proof of Concept\n```bash\n{}\n```\n\n## Evidence (Truncated)\n```\n{}\n```\n",
            record.category, self.program, record.endpoint, record.curl, record.evidence
        );
        if let Some(headers) = &record.headers {
            md.push_str("\n## Response Headers\n```\n");
            for (k, v) in headers {
                md.push_str(&format!("{}: {}\n", k, v));
            }
            md.push_str("```\n");
        }
        if let Some(body) = &record.body {
            md.push_str(&format!("\n## Body (Truncated)\n```\n{}\n```\n", truncate_chars(body, 1000)));
        }
        if let Some(cvss) = &record.cvss_vector {
            md.push_str(&format!("\n**CVSS:** `{}`\n", cvss));
        }

        let entry = IndexEntry {
            filename: format!("{}.md", name),
            name,
            category: record.category,
            endpoint: record.endpoint,
            method: None,
            confidence: None,
            curl: record.curl,
            evidence: record.evidence,
        };
        self.emit(entry, md).await
    }

    async fn finish(&self) -> anyhow::Result<()> {
        drop(self.tx.lock().take());
        let writer = self.writer.lock().take();
        if let Some(handle) = writer {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "jsonl writer task failed");
            }
        }

        let snapshot: Vec<IndexEntry> = self.index.lock().values().cloned().collect();
        let mut entries: Vec<&IndexEntry> = snapshot.iter().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let index_path = self.dir.join(INDEX_FILE);
        tokio::fs::write(&index_path, self.render_index(&entries))
            .await
            .with_context(|| format!("writing {}", index_path.display()))?;
        write_csv(&self.dir.join(CSV_FILE), &entries)?;
        tracing::info!(entries = entries.len(), dir = %self.dir.display(), "report index written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_files_index_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let rep = MarkdownReporter::new(dir.path(), "Acme").unwrap();

        let f = Finding::new("Reflected XSS (indicator)", "GET", "https://a.test/search?q=BHXSS", "<p>BHXSS</p>", 0.9);
        rep.write(&f).await.unwrap();
        rep.record(RawRecord::new("Open Redirect", "https://a.test/go?next=x", "Location: https://evil.example/"))
            .await
            .unwrap();
        rep.finish().await.unwrap();

        let md = std::fs::read_to_string(dir.path().join("reflected-xss-indicator-https-a-test-search-q-bhxss.md")).unwrap();
        assert!(md.starts_with("# Reflected XSS (indicator)"));
        assert!(md.contains("**Program:** Acme"));
        assert!(md.contains("curl -i -X GET 'https://a.test/search?q=BHXSS'"));
        assert!(md.contains("Pending triage."));

        let index = std::fs::read_to_string(dir.path().join("INDEX.md")).unwrap();
        assert!(index.starts_with("# Findings Index - Acme"));
        let open = index.find("open-redirect").unwrap();
        let xss = index.find("reflected-xss").unwrap();
        assert!(open < xss);

        let jsonl = read_jsonl(&dir.path().join("findings.jsonl"));
        assert_eq!(jsonl.len(), 2);
        assert!(dir.path().join("findings.csv").exists());
    }

    #[tokio::test]
    async fn test_previous_entries_survive_a_new_reporter() {
        let dir = tempfile::tempdir().unwrap();
        {
            let rep = MarkdownReporter::new(dir.path(), "Acme").unwrap();
            rep.record(RawRecord::new("Open Redirect", "https://a.test/", "loc")).await.unwrap();
            rep.finish().await.unwrap();
        }
        let rep = MarkdownReporter::new(dir.path(), "Acme").unwrap();
        rep.record(RawRecord::new("CORS Misconfiguration", "https://a.test/", "acao")).await.unwrap();
        rep.finish().await.unwrap();

        let index = std::fs::read_to_string(dir.path().join("INDEX.md")).unwrap();
        assert!(index.contains("open-redirect"));
        assert!(index.contains("cors-misconfiguration"));
    }
}
