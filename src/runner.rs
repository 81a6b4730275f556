use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bounty_hunter::advice;
use bounty_hunter::checks::build_modules;
use bounty_hunter::config::{ModuleKind, Settings};
use bounty_hunter::probe::BoundedFetcher;
use bounty_hunter::report::{MarkdownReporter, ReportSink};
use bounty_hunter::scheduler::{ScanSummary, Scheduler};
use bounty_hunter::scope::diff_scope;
use bounty_hunter::utils::{ensure_dir, load_endpoints};

use crate::cli::{Cli, Commands};

/// Flag values that override file and environment settings.
#[derive(Debug, Default)]
struct Overrides {
    concurrency: Option<usize>,
    per_host: Option<usize>,
    timeout: Option<f64>,
    workers: Option<usize>,
    chunk_size: Option<usize>,
    threshold: Option<f64>,
    disable: Vec<ModuleKind>,
    enable_oob: bool,
}

impl Overrides {
    fn apply(self, settings: &mut Settings) {
        if let Some(c) = self.concurrency {
            settings.max_concurrency = c;
        }
        if let Some(p) = self.per_host {
            settings.per_host = p;
        }
        if let Some(t) = self.timeout {
            settings.timeout_s = t;
        }
        if let Some(w) = self.workers {
            settings.workers = w;
        }
        if let Some(c) = self.chunk_size {
            settings.chunk_size = c;
        }
        if let Some(t) = self.threshold {
            settings.confidence_threshold = t;
        }
        if self.enable_oob {
            settings.oob_enabled = true;
            settings.modules.set(ModuleKind::OobSsrf, true);
        }
        for kind in self.disable {
            settings.modules.set(kind, false);
        }
    }
}

pub async fn run_from_cli(cli: Cli) -> anyhow::Result<()> {
    // Keep reqwest/hyper at INFO so per-request noise stays out of the CLI.
    use tracing_subscriber::EnvFilter;
    let crate_level = if cli.debug { "debug" } else if cli.verbose { "info" } else { "warn" };
    let filter_str = format!("bounty_hunter={crate},reqwest=info,hyper=info,h2=info", crate = crate_level);
    let env_filter = EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new(crate_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(true)
        .with_target(false)
        .init();

    match cli.command {
        Commands::DiffScope { previous, current } => {
            let diff = diff_scope(&previous, &current)?;
            println!("{}", serde_json::to_string_pretty(&diff)?);
            Ok(())
        }
        Commands::Scan {
            endpoints,
            out,
            resume,
            config,
            concurrency,
            per_host,
            timeout,
            workers,
            chunk_size,
            threshold,
            disable,
            enable_oob,
        } => {
            let overrides = Overrides {
                concurrency,
                per_host,
                timeout,
                workers,
                chunk_size,
                threshold,
                disable,
                enable_oob,
            };
            let mut settings = Settings::load(config.as_deref())?;
            overrides.apply(&mut settings);
            settings.validate()?;
            run_scan(settings, endpoints, out, resume, !cli.debug).await
        }
    }
}

async fn run_scan(
    settings: Settings,
    endpoints_file: PathBuf,
    out: PathBuf,
    resume: bool,
    progress_bar: bool,
) -> anyhow::Result<()> {
    ensure_dir(&out)?;

    let fetcher = Arc::new(BoundedFetcher::new(&settings).context("building HTTP client")?);
    let advisor = advice::from_settings(&settings);
    let reporter: Arc<dyn ReportSink> =
        Arc::new(MarkdownReporter::new(&out, &settings.program)?.with_advice(advisor.clone()));
    let modules = build_modules(&settings, fetcher.clone(), reporter.clone(), advisor);

    let scheduler = Scheduler::new(&out, &settings).with_progress_bar(progress_bar);
    let cancel = scheduler.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight chunks");
            cancel.cancel();
        }
    });

    tracing::info!(out = %out.display(), resume, modules = modules.len(), "starting scan");
    let outcome = if resume {
        scheduler.resume(modules).await
    } else {
        let endpoints = load_endpoints(&endpoints_file)?;
        scheduler.run(endpoints, modules).await
    };

    // Reports for finished chunks are flushed even when the run failed.
    if let Err(e) = reporter.finish().await {
        tracing::warn!(error = %e, "failed to finalize reports");
    }
    let summary = outcome?;
    print_summary(&summary, &out, fetcher.requests_sent());
    Ok(())
}

fn print_summary(summary: &ScanSummary, out: &Path, requests: u64) {
    println!("\n{}", "-".repeat(60));
    println!(
        "[>] Progress: {}/{} endpoints ({} chunks this run)",
        summary.progress, summary.total_endpoints, summary.chunks_processed
    );
    println!("[>] Requests sent: {}", requests);
    if summary.module_failures > 0 {
        println!("[!] Module failures: {} (see log)", summary.module_failures);
    }
    if summary.workers_lost > 0 {
        println!("[!] {} worker(s) stopped early; continue with --resume", summary.workers_lost);
    }
    if summary.cancelled {
        println!("[!] Interrupted; continue with --resume");
    }
    println!("[>] Reports: {}", out.display());
}
