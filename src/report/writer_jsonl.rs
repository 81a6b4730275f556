use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// One line of `findings.jsonl`; also the row source for the index and CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub filename: String,
    pub category: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub curl: String,
    pub evidence: String,
}

/// Spawn a background task that appends received entries as JSONL to `path`.
pub fn spawn_jsonl_writer(path: PathBuf, mut rx: mpsc::Receiver<IndexEntry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match OpenOptions::new().create(true).append(true).open(&path).await {
            Ok(mut f) => {
                while let Some(entry) = rx.recv().await {
                    match serde_json::to_vec(&entry) {
                        Ok(mut line) => {
                            line.push(b'\n');
                            if let Err(e) = f.write_all(&line).await {
                                tracing::error!(error = %e, "failed to write jsonl line");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to serialize index entry");
                        }
                    }
                }
                if let Err(e) = f.flush().await {
                    tracing::error!(error = %e, "failed to flush jsonl writer");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, path = %path.display(), "failed to open jsonl output file");
            }
        }
    })
}

/// Entries from a previous run. Unreadable lines are skipped.
pub fn read_jsonl(path: &Path) -> Vec<IndexEntry> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match serde_json::from_str(l) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed jsonl line");
                None
            }
        })
        .collect()
}
