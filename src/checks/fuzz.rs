use async_trait::async_trait;

use crate::config::ModuleKind;
use crate::fuzz::FuzzCoordinator;
use crate::scheduler::CheckModule;

/// Runs the fuzz coordinator over a chunk.
pub struct FuzzModule {
    coordinator: FuzzCoordinator,
}

impl FuzzModule {
    pub fn new(coordinator: FuzzCoordinator) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl CheckModule for FuzzModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Fuzz
    }

    async fn run(&self, endpoints: &[String]) -> anyhow::Result<()> {
        let reports = self.coordinator.scan_batch(endpoints).await;
        let findings: usize = reports.iter().map(|r| r.findings.len()).sum();
        let suppressed: usize = reports.iter().map(|r| r.suppressed.len()).sum();
        tracing::info!(endpoints = endpoints.len(), findings, suppressed, "fuzz batch done");
        Ok(())
    }
}
