pub mod advice;
pub mod checks;
pub mod config;
pub mod errors;
pub mod fuzz;
pub mod http_client;
pub mod probe;
pub mod report;
pub mod scheduler;
pub mod scope;
pub mod signatures;
pub mod utils;
pub mod waf;

pub use crate::config::{ModuleKind, Settings};
pub use crate::errors::{ConfigError, FetchFailure, StateError};
