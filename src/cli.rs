use std::path::PathBuf;

use bounty_hunter::config::ModuleKind;
use clap::Parser;

#[derive(clap::Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable detailed debug logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    /// Enable verbose logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Probe every endpoint in a newline-delimited file
    Scan {
        /// File with one endpoint URL per line
        endpoints: PathBuf,

        /// Output directory (reports, state.json, endpoints.json)
        #[arg(short = 'o', long, default_value = "./results")]
        out: PathBuf,

        /// Continue the scan persisted in the output directory
        #[arg(long, default_value_t = false)]
        resume: bool,

        /// JSON settings file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Global concurrency
        #[arg(short = 'c', long)]
        concurrency: Option<usize>,

        /// Concurrent requests per host
        #[arg(long)]
        per_host: Option<usize>,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Scheduler workers
        #[arg(long)]
        workers: Option<usize>,

        /// Endpoints per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Drop findings below this confidence (0..1)
        #[arg(long)]
        threshold: Option<f64>,

        /// Disable a check module (repeatable), e.g. --disable jwt
        #[arg(long = "disable", value_name = "MODULE")]
        disable: Vec<ModuleKind>,

        /// Enable the out-of-band SSRF module (needs CANARY_DOMAIN)
        #[arg(long, default_value_t = false)]
        enable_oob: bool,
    },

    /// Compare two endpoints.json files
    DiffScope {
        previous: PathBuf,
        current: PathBuf,
    },
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
