//! Extra probe suggestions and short impact summaries from a language model.
//! Every failure degrades to "no advice".

pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Settings;

pub use openai::OpenAiAdvisor;

/// At most this many suggestions are used per endpoint.
pub const ADVICE_LIMIT: usize = 5;

#[async_trait]
pub trait AdviceSource: Send + Sync {
    /// Candidate probe strings for the given context. Never fails; an
    /// unavailable backend yields an empty list.
    async fn advise(&self, context: &str) -> Vec<String>;

    async fn summarize_risk(&self, _evidence: &str) -> Option<String> {
        None
    }
}

pub struct NoAdvice;

#[async_trait]
impl AdviceSource for NoAdvice {
    async fn advise(&self, _context: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Context string handed to the advice source for one endpoint.
pub fn endpoint_context(url: &str) -> String {
    format!("URL: {}\nHeaders: minimal\nObservations: n/a", url)
}

pub fn from_settings(settings: &Settings) -> Arc<dyn AdviceSource> {
    match (settings.llm_provider.as_str(), settings.openai_api_key.as_deref()) {
        ("openai", Some(key)) if !key.trim().is_empty() => match OpenAiAdvisor::new(settings, key) {
            Ok(advisor) => Arc::new(advisor),
            Err(e) => {
                tracing::warn!(error = %e, "advice client unavailable, continuing without it");
                Arc::new(NoAdvice)
            }
        },
        ("openai", _) => {
            tracing::warn!("LLM_PROVIDER=openai but OPENAI_API_KEY is not set");
            Arc::new(NoAdvice)
        }
        _ => Arc::new(NoAdvice),
    }
}
