use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::StateError;

pub const STATE_FILE: &str = "state.json";
pub const ENDPOINTS_FILE: &str = "endpoints.json";

/// Persisted resume point. `progress` counts endpoints, from the start of
/// `endpoints`, whose chunk pipeline has completed. `completed` holds finished
/// ranges past the watermark (offset -> end) so a resume skips them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    pub endpoints: Vec<String>,
    pub progress: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub completed: BTreeMap<usize, usize>,
}

impl ScanState {
    pub fn fresh(endpoints: Vec<String>) -> Self {
        Self::at(endpoints, 0)
    }

    pub fn at(endpoints: Vec<String>, progress: usize) -> Self {
        Self { endpoints, progress, completed: BTreeMap::new() }
    }

    /// Record `[offset, end)` as finished and advance the watermark over
    /// every range now contiguous with it.
    pub fn mark_complete(&mut self, offset: usize, end: usize) {
        let end = end.min(self.endpoints.len());
        if end <= self.progress {
            return;
        }
        let slot = self.completed.entry(offset).or_insert(end);
        *slot = (*slot).max(end);
        loop {
            let progress = self.progress;
            let reach = self.completed.range(..=progress).map(|(_, e)| *e).max();
            self.completed.retain(|o, _| *o > progress);
            match reach {
                Some(e) if e > progress => self.progress = e,
                _ => break,
            }
        }
    }

    /// Whether `[offset, end)` lies inside an already finished range.
    pub fn covers(&self, offset: usize, end: usize) -> bool {
        end <= self.progress || self.completed.range(..=offset).any(|(_, e)| *e >= end)
    }

    pub fn remaining(&self) -> &[String] {
        &self.endpoints[self.progress.min(self.endpoints.len())..]
    }

    pub fn is_complete(&self) -> bool {
        self.progress >= self.endpoints.len()
    }

    /// Read and validate `state.json` from `dir`.
    pub async fn load(dir: &Path) -> Result<Self, StateError> {
        let path = dir.join(STATE_FILE);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StateError::Missing(path)),
            Err(e) => return Err(corrupt(&path, format!("unreadable: {}", e))),
        };
        Self::parse(&path, &text)
    }

    /// Shape checks are done on the raw JSON so each violation gets a
    /// precise message.
    pub fn parse(path: &Path, text: &str) -> Result<Self, StateError> {
        let value: Value = serde_json::from_str(text).map_err(|e| corrupt(path, format!("invalid JSON: {}", e)))?;
        let obj = value
            .as_object()
            .ok_or_else(|| corrupt(path, "top level is not an object".into()))?;

        let endpoints = match obj.get("endpoints") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<String>>>()
                .ok_or_else(|| corrupt(path, "endpoints must contain only strings".into()))?,
            Some(_) => return Err(corrupt(path, "endpoints is not an array".into())),
            None => return Err(corrupt(path, "endpoints is missing".into())),
        };

        let progress = match obj.get("progress") {
            Some(v) => v
                .as_u64()
                .ok_or_else(|| corrupt(path, format!("progress {} is not a non-negative integer", v)))?,
            None => return Err(corrupt(path, "progress is missing".into())),
        };
        let progress = usize::try_from(progress).map_err(|_| corrupt(path, "progress overflows".into()))?;
        if progress > endpoints.len() {
            return Err(corrupt(
                path,
                format!("progress {} exceeds {} endpoints", progress, endpoints.len()),
            ));
        }

        let mut completed = BTreeMap::new();
        match obj.get("completed") {
            None => {}
            Some(Value::Object(ranges)) => {
                for (offset, end) in ranges {
                    let offset: usize = offset
                        .parse()
                        .map_err(|_| corrupt(path, format!("completed offset {:?} is not an integer", offset)))?;
                    let end = end
                        .as_u64()
                        .and_then(|e| usize::try_from(e).ok())
                        .ok_or_else(|| corrupt(path, format!("completed end {} is not an integer", end)))?;
                    if offset >= end || end > endpoints.len() {
                        return Err(corrupt(path, format!("completed range {}..{} is out of bounds", offset, end)));
                    }
                    completed.insert(offset, end);
                }
            }
            Some(_) => return Err(corrupt(path, "completed is not an object".into())),
        }

        Ok(Self { endpoints, progress, completed })
    }

    /// Atomically replace `state.json` (temp file + rename).
    pub async fn persist(&self, dir: &Path) -> Result<(), StateError> {
        write_atomic(&dir.join(STATE_FILE), self).await
    }

    /// `endpoints.json`: the plain de-duplicated list, consumed by scope diffs.
    pub async fn persist_endpoints(&self, dir: &Path) -> Result<(), StateError> {
        write_atomic(&dir.join(ENDPOINTS_FILE), &self.endpoints).await
    }
}

fn corrupt(path: &Path, reason: String) -> StateError {
    StateError::Corrupt { path: path.to_path_buf(), reason }
}

async fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StateError> {
    let persist_err = |source: std::io::Error| StateError::Persist { path: path.to_path_buf(), source };

    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| persist_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(persist_err)?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, &bytes).await.map_err(persist_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(persist_err)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p() -> PathBuf {
        PathBuf::from("state.json")
    }

    #[test]
    fn test_parse_valid() {
        let s = ScanState::parse(&p(), r#"{"endpoints": ["a", "b", "c"], "progress": 2}"#).unwrap();
        assert_eq!(s.remaining().to_vec(), vec!["c".to_string()]);
        assert!(!s.is_complete());
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for bad in [
            "not json",
            "[]",
            r#"{"progress": 0}"#,
            r#"{"endpoints": "a", "progress": 0}"#,
            r#"{"endpoints": [1], "progress": 0}"#,
            r#"{"endpoints": ["a"], "progress": "1"}"#,
            r#"{"endpoints": ["a"], "progress": -1}"#,
            r#"{"endpoints": ["a"], "progress": 1.5}"#,
            r#"{"endpoints": ["a"], "progress": 2}"#,
            r#"{"endpoints": ["a"]}"#,
        ] {
            let err = ScanState::parse(&p(), bad).unwrap_err();
            assert!(matches!(err, StateError::Corrupt { .. }), "accepted {}", bad);
        }
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = ScanState::fresh(vec!["https://a.test/".into(), "https://b.test/".into()]);
        s.persist(dir.path()).await.unwrap();
        s.persist_endpoints(dir.path()).await.unwrap();
        s.progress = 1;
        s.persist(dir.path()).await.unwrap();

        let back = ScanState::load(dir.path()).await.unwrap();
        assert_eq!(back, s);
        assert!(!dir.path().join("state.json.tmp").exists());

        let eps: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(ENDPOINTS_FILE)).unwrap()).unwrap();
        assert_eq!(eps.len(), 2);
    }

    #[test]
    fn test_watermark_skips_over_finished_ranges() {
        let eps: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        let mut s = ScanState::fresh(eps);
        s.mark_complete(4, 6);
        s.mark_complete(6, 8);
        assert_eq!(s.progress, 0);
        assert!(s.covers(4, 6));
        assert!(!s.covers(2, 4));

        s.mark_complete(2, 4);
        assert_eq!(s.progress, 0);
        s.mark_complete(0, 2);
        assert_eq!(s.progress, 8);
        assert!(s.completed.is_empty());
    }

    #[test]
    fn test_completed_ranges_survive_a_reload() {
        let eps: Vec<String> = (0..6).map(|i| i.to_string()).collect();
        let mut s = ScanState::fresh(eps);
        s.mark_complete(4, 6);
        let text = serde_json::to_string(&s).unwrap();
        assert!(text.contains("\"completed\":{\"4\":6}"));

        let back = ScanState::parse(&p(), &text).unwrap();
        assert_eq!(back, s);

        let plain = serde_json::to_string(&ScanState::at(vec!["a".into()], 1)).unwrap();
        assert!(!plain.contains("completed"));
    }

    #[test]
    fn test_parse_rejects_bad_completed() {
        for bad in [
            r#"{"endpoints": ["a", "b"], "progress": 0, "completed": []}"#,
            r#"{"endpoints": ["a", "b"], "progress": 0, "completed": {"x": 2}}"#,
            r#"{"endpoints": ["a", "b"], "progress": 0, "completed": {"1": 3}}"#,
            r#"{"endpoints": ["a", "b"], "progress": 0, "completed": {"1": 1}}"#,
        ] {
            assert!(matches!(ScanState::parse(&p(), bad), Err(StateError::Corrupt { .. })), "accepted {}", bad);
        }
    }

    #[tokio::test]
    async fn test_missing_state() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(ScanState::load(dir.path()).await, Err(StateError::Missing(_))));
    }
}
