use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bounty_hunter::config::{ModuleKind, Settings};
use bounty_hunter::errors::StateError;
use bounty_hunter::scheduler::{CheckModule, ScanState, Scheduler, ENDPOINTS_FILE, STATE_FILE};
use parking_lot::Mutex;

/// Records every endpoint it is handed.
struct Recorder {
    kind: ModuleKind,
    seen: Mutex<Vec<String>>,
}

impl Recorder {
    fn new(kind: ModuleKind) -> Arc<Self> {
        Arc::new(Self { kind, seen: Mutex::new(Vec::new()) })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl CheckModule for Recorder {
    fn kind(&self) -> ModuleKind {
        self.kind
    }

    async fn run(&self, endpoints: &[String]) -> anyhow::Result<()> {
        self.seen.lock().extend(endpoints.iter().cloned());
        Ok(())
    }
}

struct AlwaysFails;

#[async_trait]
impl CheckModule for AlwaysFails {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Fuzz
    }

    async fn run(&self, _endpoints: &[String]) -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }
}

/// Panics on the first chunk it sees, then behaves.
struct PanicsOnce {
    fired: AtomicBool,
}

#[async_trait]
impl CheckModule for PanicsOnce {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Fuzz
    }

    async fn run(&self, _endpoints: &[String]) -> anyhow::Result<()> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            panic!("module exploded");
        }
        Ok(())
    }
}

fn settings(chunk_size: usize, workers: usize) -> Settings {
    Settings {
        chunk_size,
        workers,
        queue_pop_timeout_s: 0.05,
        ..Settings::default()
    }
}

fn endpoints(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("https://t{}.test/", i)).collect()
}

#[tokio::test]
async fn resume_skips_completed_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let all = endpoints(10);
    ScanState::at(all.clone(), 4).persist(dir.path()).await.unwrap();

    let recorder = Recorder::new(ModuleKind::Redirects);
    let scheduler = Scheduler::new(dir.path(), &settings(2, 1));
    let summary = scheduler.resume(vec![recorder.clone() as Arc<dyn CheckModule>]).await.unwrap();

    assert_eq!(recorder.seen(), all[4..].to_vec());
    assert_eq!(summary.started_at, 4);
    assert_eq!(summary.progress, 10);
    assert_eq!(summary.chunks_processed, 3);

    let state = ScanState::load(dir.path()).await.unwrap();
    assert_eq!(state.progress, 10);
    assert!(state.is_complete());
}

#[tokio::test]
async fn resume_of_finished_scan_does_nothing() {
    let dir = tempfile::tempdir().unwrap();
    ScanState::at(endpoints(3), 3).persist(dir.path()).await.unwrap();

    let recorder = Recorder::new(ModuleKind::Auth);
    let summary = Scheduler::new(dir.path(), &settings(2, 2))
        .resume(vec![recorder.clone() as Arc<dyn CheckModule>])
        .await
        .unwrap();
    assert!(recorder.seen().is_empty());
    assert_eq!(summary.chunks_processed, 0);
}

#[tokio::test]
async fn corrupt_state_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(STATE_FILE), "{not json").unwrap();

    let recorder = Recorder::new(ModuleKind::Fuzz);
    let res = Scheduler::new(dir.path(), &settings(2, 1)).resume(vec![recorder.clone() as Arc<dyn CheckModule>]).await;
    assert!(matches!(res, Err(StateError::Corrupt { .. })));
    assert!(recorder.seen().is_empty());

    std::fs::write(dir.path().join(STATE_FILE), r#"{"endpoints": ["a"], "progress": 5}"#).unwrap();
    let res = Scheduler::new(dir.path(), &settings(2, 1)).resume(vec![]).await;
    assert!(matches!(res, Err(StateError::Corrupt { .. })));
}

#[tokio::test]
async fn missing_state_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let res = Scheduler::new(dir.path(), &settings(2, 1)).resume(vec![]).await;
    assert!(matches!(res, Err(StateError::Missing(_))));
}

#[tokio::test]
async fn failing_module_does_not_block_progress() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new(ModuleKind::Jwt);
    let scheduler = Scheduler::new(dir.path(), &settings(2, 2));

    let summary = scheduler
        .run(endpoints(5), vec![recorder.clone() as Arc<dyn CheckModule>, Arc::new(AlwaysFails)])
        .await
        .unwrap();

    assert_eq!(summary.progress, 5);
    assert_eq!(summary.chunks_processed, 3);
    assert_eq!(summary.module_failures, 3);
    let mut seen = recorder.seen();
    seen.sort();
    let mut expected = endpoints(5);
    expected.sort();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn fresh_run_persists_state_and_scope() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = endpoints(3);
    input.push(input[0].clone());

    let recorder = Recorder::new(ModuleKind::Fingerprint);
    let summary = Scheduler::new(dir.path(), &settings(25, 4))
        .run(input, vec![recorder.clone() as Arc<dyn CheckModule>])
        .await
        .unwrap();
    assert_eq!(summary.total_endpoints, 3);
    assert_eq!(recorder.seen(), endpoints(3));

    let scope: Vec<String> =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join(ENDPOINTS_FILE)).unwrap()).unwrap();
    assert_eq!(scope, endpoints(3));
    let state = ScanState::load(dir.path()).await.unwrap();
    assert_eq!(state.progress, 3);
    assert!(!dir.path().join("state.json.tmp").exists());
}

#[tokio::test]
async fn modules_run_in_pipeline_order() {
    struct Ordered {
        kind: ModuleKind,
        log: Arc<Mutex<Vec<ModuleKind>>>,
    }

    #[async_trait]
    impl CheckModule for Ordered {
        fn kind(&self) -> ModuleKind {
            self.kind
        }

        async fn run(&self, _endpoints: &[String]) -> anyhow::Result<()> {
            self.log.lock().push(self.kind);
            Ok(())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let modules: Vec<Arc<dyn CheckModule>> = [ModuleKind::Fingerprint, ModuleKind::Fuzz, ModuleKind::Auth]
        .into_iter()
        .map(|kind| Arc::new(Ordered { kind, log: log.clone() }) as Arc<dyn CheckModule>)
        .collect();

    Scheduler::new(dir.path(), &settings(10, 1)).run(endpoints(1), modules).await.unwrap();
    assert_eq!(*log.lock(), vec![ModuleKind::Fuzz, ModuleKind::Auth, ModuleKind::Fingerprint]);
}

#[tokio::test]
async fn panicking_module_is_counted_and_the_worker_keeps_going() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new(ModuleKind::Redirects);
    let panics = Arc::new(PanicsOnce { fired: AtomicBool::new(false) });

    let summary = Scheduler::new(dir.path(), &settings(2, 1))
        .run(endpoints(6), vec![panics as Arc<dyn CheckModule>, recorder.clone() as Arc<dyn CheckModule>])
        .await
        .unwrap();

    assert_eq!(summary.progress, 6);
    assert_eq!(summary.chunks_processed, 3);
    assert_eq!(summary.module_failures, 1);
    assert_eq!(summary.workers_lost, 0);
    assert_eq!(recorder.seen(), endpoints(6));
    assert!(ScanState::load(dir.path()).await.unwrap().is_complete());
}

#[tokio::test]
async fn resume_skips_chunks_finished_past_the_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let all = endpoints(8);
    let mut state = ScanState::at(all.clone(), 2);
    state.mark_complete(4, 6);
    state.persist(dir.path()).await.unwrap();
    let on_disk = std::fs::read_to_string(dir.path().join(STATE_FILE)).unwrap();
    assert!(on_disk.contains("completed"));

    let recorder = Recorder::new(ModuleKind::Auth);
    let summary = Scheduler::new(dir.path(), &settings(2, 1))
        .resume(vec![recorder.clone() as Arc<dyn CheckModule>])
        .await
        .unwrap();

    let mut expected = all[2..4].to_vec();
    expected.extend_from_slice(&all[6..8]);
    assert_eq!(recorder.seen(), expected);
    assert_eq!(summary.chunks_processed, 2);
    assert_eq!(summary.progress, 8);

    let state = ScanState::load(dir.path()).await.unwrap();
    assert!(state.is_complete());
    assert!(state.completed.is_empty());
}
