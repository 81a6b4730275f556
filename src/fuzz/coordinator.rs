//! Per-endpoint fuzzing: deterministic probe passes, advice-driven probes,
//! header mutations, filter-bypass retries and two-pass confirmation.

use std::sync::Arc;

use ahash::AHashSet;
use futures::future::join_all;
use url::Url;

use crate::advice::{endpoint_context, AdviceSource, NoAdvice, ADVICE_LIMIT};
use crate::config::Settings;
use crate::fuzz::payloads::{ProbeCatalog, ProbeCategory};
use crate::probe::fetch::{BoundedFetcher, FetchRequest, FetchResult};
use crate::report::{Finding, ReportSink};
use crate::signatures::{SignatureKind, SignatureSet};
use crate::utils::substitute_query;
use crate::waf::{alternate_encodings, guess_vendor, is_blocked_status, Mutator};

pub const LABEL_XSS: &str = "Reflected XSS (indicator)";
pub const LABEL_SQLI_ERROR: &str = "Potential SQLi (error-based)";
pub const LABEL_SQLI_TIME: &str = "Potential SQLi (time-based)";
pub const LABEL_SSTI: &str = "Template Injection indicator";
pub const LABEL_SSRF: &str = "SSRF indicator reflected";
pub const LABEL_HEADER: &str = "Header-reflection";

/// Confidence of a hit the confirmation fetch reproduced.
pub const CONFIRMED: f64 = 0.9;
/// Confidence of a hit the confirmation fetch did not reproduce.
pub const UNCONFIRMED: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DeterministicProbing,
    AdaptiveProbing,
    HeaderMutation,
    Done,
}

impl Stage {
    fn next(self) -> Stage {
        match self {
            Stage::DeterministicProbing => Stage::AdaptiveProbing,
            Stage::AdaptiveProbing => Stage::HeaderMutation,
            Stage::HeaderMutation | Stage::Done => Stage::Done,
        }
    }
}

/// Outcome of scanning one endpoint.
#[derive(Debug, Clone, Default)]
pub struct EndpointReport {
    pub endpoint: String,
    /// Hits at or above the confidence threshold, already handed to the sink.
    pub findings: Vec<Finding>,
    /// Hits below the threshold. Kept for telemetry only.
    pub suppressed: Vec<Finding>,
    /// Fetches issued for this endpoint, confirmations included.
    pub requests: u64,
}

struct EndpointScan {
    base: Url,
    /// (query key or header set, label) pairs that already produced a finding.
    closed: AHashSet<(String, &'static str)>,
    report: EndpointReport,
}

impl EndpointScan {
    fn is_closed(&self, slot: &str, label: &'static str) -> bool {
        self.closed.contains(&(slot.to_string(), label))
    }
}

pub struct FuzzCoordinator {
    fetcher: Arc<BoundedFetcher>,
    reporter: Arc<dyn ReportSink>,
    advice: Arc<dyn AdviceSource>,
    signatures: Arc<SignatureSet>,
    mutator: Arc<Mutator>,
    catalog: Arc<ProbeCatalog>,
    threshold: f64,
}

impl FuzzCoordinator {
    pub fn new(fetcher: Arc<BoundedFetcher>, reporter: Arc<dyn ReportSink>) -> Self {
        Self {
            fetcher,
            reporter,
            advice: Arc::new(NoAdvice),
            signatures: Arc::new(SignatureSet::standard()),
            mutator: Arc::new(Mutator::new()),
            catalog: Arc::new(ProbeCatalog::standard()),
            threshold: 0.0,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        fetcher: Arc<BoundedFetcher>,
        reporter: Arc<dyn ReportSink>,
        advice: Arc<dyn AdviceSource>,
    ) -> Self {
        Self::new(fetcher, reporter)
            .with_advice(advice)
            .with_signatures(SignatureSet::standard().with_slow_threshold(settings.response_time_threshold()))
            .with_threshold(settings.confidence_threshold)
    }

    pub fn with_advice(mut self, advice: Arc<dyn AdviceSource>) -> Self {
        self.advice = advice;
        self
    }

    pub fn with_signatures(mut self, signatures: SignatureSet) -> Self {
        self.signatures = Arc::new(signatures);
        self
    }

    pub fn with_mutator(mut self, mutator: Mutator) -> Self {
        self.mutator = Arc::new(mutator);
        self
    }

    pub fn with_catalog(mut self, catalog: ProbeCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Scan every endpoint concurrently; the fetcher's semaphores bound the
    /// actual parallelism.
    pub async fn scan_batch(&self, endpoints: &[String]) -> Vec<EndpointReport> {
        join_all(endpoints.iter().map(|e| self.scan_endpoint(e))).await
    }

    pub async fn scan_endpoint(&self, endpoint: &str) -> EndpointReport {
        let base = match Url::parse(endpoint) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => u,
            _ => {
                tracing::debug!(endpoint, "skipping non-http endpoint");
                return EndpointReport { endpoint: endpoint.to_string(), ..Default::default() };
            }
        };

        let mut scan = EndpointScan {
            base,
            closed: AHashSet::new(),
            report: EndpointReport { endpoint: endpoint.to_string(), ..Default::default() },
        };

        let mut stage = Stage::DeterministicProbing;
        while stage != Stage::Done {
            tracing::debug!(endpoint, ?stage, "fuzz stage");
            match stage {
                Stage::DeterministicProbing => self.deterministic_pass(&mut scan).await,
                Stage::AdaptiveProbing => self.adaptive_pass(&mut scan, endpoint).await,
                Stage::HeaderMutation => self.header_pass(&mut scan).await,
                Stage::Done => {}
            }
            stage = stage.next();
        }

        tracing::info!(
            endpoint,
            findings = scan.report.findings.len(),
            suppressed = scan.report.suppressed.len(),
            requests = scan.report.requests,
            "endpoint fuzzed"
        );
        scan.report
    }

    async fn deterministic_pass(&self, scan: &mut EndpointScan) {
        for category in ProbeCategory::STATIC {
            for key in &self.catalog.keys {
                for probe in self.catalog.probes(category) {
                    self.probe_slot(scan, key, probe, category).await;
                }
            }
        }
    }

    async fn adaptive_pass(&self, scan: &mut EndpointScan, endpoint: &str) {
        let mut advised = self.advice.advise(&endpoint_context(endpoint)).await;
        advised.truncate(ADVICE_LIMIT);
        if advised.is_empty() {
            return;
        }
        tracing::debug!(endpoint, count = advised.len(), "adaptive probes");
        for probe in &advised {
            for key in &self.catalog.keys {
                self.probe_slot(scan, key, probe, ProbeCategory::LlmVariant).await;
            }
        }
    }

    async fn header_pass(&self, scan: &mut EndpointScan) {
        let url = scan.base.to_string();
        for set in &self.catalog.header_mutations {
            let names: Vec<&str> = set.iter().map(|(k, _)| k.as_str()).collect();
            let slot = format!("header:{}", names.join(","));
            if scan.is_closed(&slot, LABEL_HEADER) {
                continue;
            }
            scan.report.requests += 1;
            let result = match self.fetcher.fetch(FetchRequest::get(url.as_str()).headers(set.clone())).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "header mutation fetch failed");
                    continue;
                }
            };
            if self.signatures.matches(SignatureKind::Xss, &result.body)
                || self.signatures.matches(SignatureKind::Ssti, &result.body)
            {
                self.record(scan, &slot, LABEL_HEADER, &url, &result.body, CONFIRMED).await;
            }
        }
    }

    /// Every variant of `probe` in `key`; a blocked variant is retried once
    /// with each of its alternate encodings.
    async fn probe_slot(&self, scan: &mut EndpointScan, key: &str, probe: &str, category: ProbeCategory) {
        for variant in self.mutator.variants(probe) {
            let url = substitute_query(&scan.base, key, &variant);
            let status = self.request_and_check(scan, key, url.as_str(), category).await;
            if status.map_or(false, is_blocked_status) {
                for alt in alternate_encodings(&variant) {
                    let retry = substitute_query(&scan.base, key, &alt);
                    self.request_and_check(scan, key, retry.as_str(), category).await;
                }
            }
        }
    }

    async fn request_and_check(
        &self,
        scan: &mut EndpointScan,
        key: &str,
        url: &str,
        category: ProbeCategory,
    ) -> Option<u16> {
        scan.report.requests += 1;
        let result = match self.fetcher.get(url).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(url, error = %e, "probe fetch failed");
                return None;
            }
        };
        if is_blocked_status(result.status) {
            tracing::debug!(url, status = result.status, vendor = ?guess_vendor(&result), "probe blocked");
            return Some(result.status);
        }

        let all = category == ProbeCategory::LlmVariant;
        if all || category == ProbeCategory::Xss {
            self.check_signature(scan, key, url, &result, SignatureKind::Xss, LABEL_XSS).await;
        }
        if all || category == ProbeCategory::Sqli {
            self.check_sqli(scan, key, url, &result).await;
        }
        if all || category == ProbeCategory::Ssti {
            self.check_signature(scan, key, url, &result, SignatureKind::Ssti, LABEL_SSTI).await;
        }
        if all || category == ProbeCategory::Ssrf {
            self.check_signature(scan, key, url, &result, SignatureKind::Ssrf, LABEL_SSRF).await;
        }
        Some(result.status)
    }

    async fn check_signature(
        &self,
        scan: &mut EndpointScan,
        key: &str,
        url: &str,
        result: &FetchResult,
        kind: SignatureKind,
        label: &'static str,
    ) {
        if scan.is_closed(key, label) || !self.signatures.matches(kind, &result.body) {
            return;
        }
        let confirmed = match self.confirm(scan, &result.final_url).await {
            Some(again) => self.signatures.matches(kind, &again.body),
            None => false,
        };
        let confidence = if confirmed { CONFIRMED } else { UNCONFIRMED };
        self.record(scan, key, label, url, &result.body, confidence).await;
    }

    async fn check_sqli(&self, scan: &mut EndpointScan, key: &str, url: &str, result: &FetchResult) {
        let hit = self.signatures.matches(SignatureKind::SqliError, &result.body);
        let slow = self.signatures.is_slow(result.elapsed);
        if !hit && !slow {
            return;
        }
        let label = if hit { LABEL_SQLI_ERROR } else { LABEL_SQLI_TIME };
        if scan.is_closed(key, label) {
            return;
        }

        let (again_hit, again_slow) = match self.confirm(scan, &result.final_url).await {
            Some(again) => (
                self.signatures.matches(SignatureKind::SqliError, &again.body),
                self.signatures.is_slow(again.elapsed),
            ),
            None => (false, false),
        };
        let confirmed = (hit && again_hit) || (slow && again_slow);
        let confidence = if confirmed { CONFIRMED } else { UNCONFIRMED };
        self.record(scan, key, label, url, &result.body, confidence).await;
    }

    async fn confirm(&self, scan: &mut EndpointScan, url: &str) -> Option<FetchResult> {
        scan.report.requests += 1;
        match self.fetcher.get(url).await {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::debug!(url, error = %e, "confirmation fetch failed");
                None
            }
        }
    }

    async fn record(
        &self,
        scan: &mut EndpointScan,
        slot: &str,
        label: &'static str,
        url: &str,
        evidence: &str,
        confidence: f64,
    ) {
        let finding = Finding::new(label, "GET", url, evidence, confidence);
        if confidence < self.threshold {
            tracing::debug!(confidence, label, url, "low-confidence hit suppressed");
            scan.report.suppressed.push(finding);
            return;
        }

        scan.closed.insert((slot.to_string(), label));
        if let Err(e) = self.reporter.write(&finding).await {
            tracing::warn!(error = %e, label, url, "failed to write finding");
        }
        tracing::info!(confidence, label, url, "finding");
        scan.report.findings.push(finding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut s = Stage::DeterministicProbing;
        let mut seen = vec![s];
        while s != Stage::Done {
            s = s.next();
            seen.push(s);
        }
        assert_eq!(
            seen,
            vec![Stage::DeterministicProbing, Stage::AdaptiveProbing, Stage::HeaderMutation, Stage::Done]
        );
    }
}
