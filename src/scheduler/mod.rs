//! Resumable chunked work queue.
//!
//! Endpoints are split into fixed-size chunks and pushed in order; a fixed
//! pool of workers pops chunks and runs every enabled module over each one.
//! After a chunk's pipeline completes the progress watermark advances over
//! the contiguous prefix of finished chunks and `state.json` is rewritten.

pub mod queue;
pub mod state;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::config::{ModuleKind, Settings};
use crate::errors::StateError;
use crate::utils::dedupe_preserving_order;

pub use queue::{split_chunks, Chunk, ChunkQueue};
pub use state::{ScanState, ENDPOINTS_FILE, STATE_FILE};

/// One check over a batch of endpoints. Errors and panics are logged by the
/// scheduler and never stop the chunk.
#[async_trait]
pub trait CheckModule: Send + Sync {
    fn kind(&self) -> ModuleKind;

    async fn run(&self, endpoints: &[String]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanSummary {
    pub total_endpoints: usize,
    /// Endpoints already done when the run started.
    pub started_at: usize,
    pub progress: usize,
    pub chunks_processed: usize,
    pub module_failures: usize,
    /// Worker tasks that ended abnormally. Their unfinished chunks stay
    /// behind the watermark and are picked up by the next resume.
    pub workers_lost: usize,
    pub cancelled: bool,
}

/// Completion bookkeeping shared by the workers; guarded by one async mutex
/// so update and persist happen together.
struct Tracker {
    state: ScanState,
    dir: PathBuf,
}

impl Tracker {
    async fn complete(&mut self, chunk: &Chunk) -> Result<usize, StateError> {
        self.state.mark_complete(chunk.offset, chunk.end());
        self.state.persist(&self.dir).await?;
        Ok(self.state.progress)
    }
}

#[derive(Default)]
struct WorkerStats {
    chunks: usize,
    failures: usize,
}

pub struct Scheduler {
    dir: PathBuf,
    chunk_size: usize,
    workers: usize,
    pop_timeout: Duration,
    queue: Arc<ChunkQueue>,
    cancel: CancellationToken,
    show_progress: bool,
}

impl Scheduler {
    pub fn new(dir: &Path, settings: &Settings) -> Self {
        Self {
            dir: dir.to_path_buf(),
            chunk_size: settings.chunk_size.max(1),
            workers: settings.workers.max(1),
            pop_timeout: settings.queue_pop_timeout(),
            queue: Arc::new(ChunkQueue::new()),
            cancel: CancellationToken::new(),
            show_progress: false,
        }
    }

    pub fn with_progress_bar(mut self, on: bool) -> Self {
        self.show_progress = on;
        self
    }

    /// Cancelling stops workers from taking new chunks; in-flight chunks
    /// finish and are persisted.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fresh run over `endpoints` (de-duplicated, order kept).
    pub async fn run(
        &self,
        endpoints: Vec<String>,
        modules: Vec<Arc<dyn CheckModule>>,
    ) -> Result<ScanSummary, StateError> {
        let state = ScanState::fresh(dedupe_preserving_order(endpoints));
        state.persist(&self.dir).await?;
        state.persist_endpoints(&self.dir).await?;
        tracing::info!(endpoints = state.endpoints.len(), chunk_size = self.chunk_size, "starting fresh scan");
        self.drive(state, modules).await
    }

    /// Continue from the persisted watermark. A missing or malformed state
    /// file is fatal.
    pub async fn resume(&self, modules: Vec<Arc<dyn CheckModule>>) -> Result<ScanSummary, StateError> {
        let state = ScanState::load(&self.dir).await?;
        tracing::info!(
            endpoints = state.endpoints.len(),
            progress = state.progress,
            "resuming scan"
        );
        self.drive(state, modules).await
    }

    async fn drive(
        &self,
        state: ScanState,
        mut modules: Vec<Arc<dyn CheckModule>>,
    ) -> Result<ScanSummary, StateError> {
        modules.sort_by_key(|m| m.kind());
        let modules: Arc<[Arc<dyn CheckModule>]> = modules.into();

        let mut chunks = split_chunks(&state.endpoints, state.progress, self.chunk_size);
        chunks.retain(|c| !state.covers(c.offset, c.end()));
        let mut summary = ScanSummary {
            total_endpoints: state.endpoints.len(),
            started_at: state.progress,
            progress: state.progress,
            ..Default::default()
        };
        if chunks.is_empty() {
            tracing::info!("nothing left to scan");
            return Ok(summary);
        }

        let todo: usize = chunks.iter().map(|c| c.endpoints.len()).sum();
        self.queue.clear();
        self.queue.push_all(chunks);

        let bar = self.progress_bar(todo as u64);
        let tracker = Arc::new(tokio::sync::Mutex::new(Tracker { state, dir: self.dir.clone() }));

        let handles: Vec<_> = (0..self.workers)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    self.queue.clone(),
                    modules.clone(),
                    tracker.clone(),
                    self.cancel.clone(),
                    self.pop_timeout,
                    bar.clone(),
                ))
            })
            .collect();

        let mut first_err = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(stats)) => {
                    summary.chunks_processed += stats.chunks;
                    summary.module_failures += stats.failures;
                }
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(e) => {
                    summary.workers_lost += 1;
                    tracing::error!(error = %e, "worker task aborted");
                }
            }
        }
        if let Some(b) = &bar {
            b.finish_and_clear();
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        summary.progress = tracker.lock().await.state.progress;
        summary.cancelled = self.cancel.is_cancelled();
        tracing::info!(
            progress = summary.progress,
            total = summary.total_endpoints,
            chunks = summary.chunks_processed,
            failures = summary.module_failures,
            workers_lost = summary.workers_lost,
            "scan finished"
        );
        Ok(summary)
    }

    fn progress_bar(&self, len: u64) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let bar = ProgressBar::new(len);
        match ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} endpoints {msg}") {
            Ok(style) => bar.set_style(style.progress_chars("=>-")),
            Err(e) => tracing::debug!(error = %e, "default progress style"),
        }
        Some(bar)
    }
}

async fn worker(
    id: usize,
    queue: Arc<ChunkQueue>,
    modules: Arc<[Arc<dyn CheckModule>]>,
    tracker: Arc<tokio::sync::Mutex<Tracker>>,
    cancel: CancellationToken,
    pop_timeout: Duration,
    bar: Option<ProgressBar>,
) -> Result<WorkerStats, StateError> {
    let mut stats = WorkerStats::default();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => None,
            c = queue.pop(pop_timeout) => c,
        };
        let Some(chunk) = next else {
            break;
        };

        tracing::debug!(worker = id, offset = chunk.offset, len = chunk.endpoints.len(), "chunk started");
        for module in modules.iter() {
            match AssertUnwindSafe(module.run(&chunk.endpoints)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    stats.failures += 1;
                    tracing::warn!(worker = id, module = %module.kind(), offset = chunk.offset, error = %e, "module failed");
                }
                Err(panic) => {
                    stats.failures += 1;
                    tracing::error!(
                        worker = id,
                        module = %module.kind(),
                        offset = chunk.offset,
                        panic = panic_message(&*panic),
                        "module panicked"
                    );
                }
            }
        }

        let progress = match tracker.lock().await.complete(&chunk).await {
            Ok(p) => p,
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };
        stats.chunks += 1;
        if let Some(b) = &bar {
            b.inc(chunk.endpoints.len() as u64);
        }
        tracing::info!(worker = id, offset = chunk.offset, progress, "chunk complete");
    }
    tracing::debug!(worker = id, chunks = stats.chunks, "worker exiting");
    Ok(stats)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
