use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{AcquireError, Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;

/// A permit that holds the global permit, the per-host permit and, when
/// pacing is on, the host's pacing lock. Everything is released on drop.
pub struct ThrottlePermit {
    _global: OwnedSemaphorePermit,
    _host: OwnedSemaphorePermit,
    _pace: Option<OwnedMutexGuard<()>>,
}

pub struct Throttle {
    global: Arc<Semaphore>,
    per_host: DashMap<String, Arc<Semaphore>>,
    pacing_locks: DashMap<String, Arc<Mutex<()>>>,
    default_per_host: usize,
    pacing: bool,
    max_jitter: Duration,
}

impl Throttle {
    pub fn new(global_limit: usize, default_per_host: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit.max(1))),
            per_host: DashMap::new(),
            pacing_locks: DashMap::new(),
            default_per_host: default_per_host.max(1),
            pacing: false,
            max_jitter: Duration::ZERO,
        }
    }

    /// Serialize requests per host and sleep a random jitter up to
    /// `max_jitter` before each one.
    pub fn with_pacing(mut self, pacing: bool, max_jitter: Duration) -> Self {
        self.pacing = pacing;
        self.max_jitter = max_jitter;
        self
    }

    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        self.per_host
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.default_per_host)))
            .value()
            .clone()
    }

    fn pacing_lock(&self, host: &str) -> Arc<Mutex<()>> {
        self.pacing_locks
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max = self.max_jitter.as_secs_f64();
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=max))
    }

    /// Host-level permits are taken first so a request waiting on a busy
    /// host never sits on a global permit.
    pub async fn acquire(&self, host: &str) -> Result<ThrottlePermit, AcquireError> {
        let hperm = self.host_semaphore(host).acquire_owned().await?;
        let pace = if self.pacing {
            Some(self.pacing_lock(host).lock_owned().await)
        } else {
            None
        };

        let jitter = self.jitter();
        if !jitter.is_zero() {
            sleep(jitter).await;
        }

        let gperm = self.global.clone().acquire_owned().await?;
        Ok(ThrottlePermit { _global: gperm, _host: hperm, _pace: pace })
    }
}
