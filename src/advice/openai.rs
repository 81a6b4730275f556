use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{AdviceSource, ADVICE_LIMIT};
use crate::config::Settings;

const ADVISE_PROMPT: &str = "Suggest 5 safe, non-destructive payload mutations for XSS/SQLi/SSTI/SSRF based on context. Return JSON list only.\n";
const SUMMARY_PROMPT: &str = "Draft a concise, accurate impact summary (3-5 sentences).\nEvidence:\n";

/// Chat-completions client used for adaptive probes and report summaries.
pub struct OpenAiAdvisor {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiAdvisor {
    pub fn new(settings: &Settings, api_key: &str) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout().max(Duration::from_secs(30)))
            .use_rustls_tls()
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: settings.openai_model.clone(),
            base_url: settings.openai_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn complete(&self, prompt: &str, temperature: f32) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": temperature,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("advice request failed")?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("advice backend returned {}", status));
        }

        let data: Value = resp.json().await.context("advice response is not JSON")?;
        if let Some(error) = data.get("error") {
            return Err(anyhow!("advice backend error: {}", error["message"].as_str().unwrap_or("unknown")));
        }
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow!("no content in advice response"))
    }
}

#[async_trait]
impl AdviceSource for OpenAiAdvisor {
    async fn advise(&self, context: &str) -> Vec<String> {
        let prompt = format!("{}{}", ADVISE_PROMPT, context);
        match self.complete(&prompt, 0.3).await {
            Ok(content) => parse_probe_list(&content),
            Err(e) => {
                tracing::debug!(error = %e, "no advice");
                Vec::new()
            }
        }
    }

    async fn summarize_risk(&self, evidence: &str) -> Option<String> {
        let prompt = format!("{}{}", SUMMARY_PROMPT, evidence);
        match self.complete(&prompt, 0.2).await {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "no risk summary");
                None
            }
        }
    }
}

/// Accepts a bare JSON array or one wrapped in a markdown code fence.
/// Non-string members are dropped.
pub fn parse_probe_list(content: &str) -> Vec<String> {
    let trimmed = content.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    match serde_json::from_str::<Value>(inner) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty())
            .take(ADVICE_LIMIT)
            .collect(),
        _ => Vec::new(),
    }
}
