use crate::config::Config;
use std::time::Duration;

/// One prior turn of conversation, used as history for the AI adapter.
#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

/// Inputs to one AI completion request (spec.md §4.4 step 3). Provider and
/// model are config data carried on the room, not part of this interface
/// (spec.md §9, "`AI adapter` is specified only through its inputs and
/// outputs").
#[derive(Debug, Clone)]
pub struct AiRequest<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub system_prompt: &'a str,
    pub temperature: f64,
    pub max_tokens: i64,
    pub history: &'a [HistoryTurn],
    pub message: &'a str,
}

#[rocket::async_trait]
pub trait AiAdapter: Send + Sync {
    async fn complete(&self, req: AiRequest<'_>) -> Result<String, String>;
}

/// Generic `reqwest`-backed AI client. Providers are reachable over a plain
/// chat-completions-shaped HTTP endpoint, matching the minimal reqwest facade
/// the teacher already uses for its outbound HTTP calls (`webhooks.rs`).
pub struct HttpAiAdapter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAiAdapter {
    pub fn new(config: &Config, endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.ai_timeout_secs))
            .build()
            .expect("Failed to build AI HTTP client");
        HttpAiAdapter {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[rocket::async_trait]
impl AiAdapter for HttpAiAdapter {
    async fn complete(&self, req: AiRequest<'_>) -> Result<String, String> {
        let messages: Vec<serde_json::Value> = std::iter::once(serde_json::json!({
            "role": "system",
            "content": req.system_prompt,
        }))
        .chain(req.history.iter().map(|t| {
            serde_json::json!({"role": t.role, "content": t.content})
        }))
        .chain(std::iter::once(serde_json::json!({
            "role": "user",
            "content": req.message,
        })))
        .collect();

        let body = serde_json::json!({
            "provider": req.provider,
            "model": req.model,
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
            "messages": messages,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            return Err(format!("AI adapter returned HTTP {}", resp.status()));
        }

        let parsed: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;
        parsed
            .get("reply")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "AI adapter response missing `reply` field".to_string())
    }
}

/// Always-fails adapter, useful for exercising `fallback_to_script` paths in
/// tests without a real AI endpoint configured.
pub struct UnavailableAi;

#[rocket::async_trait]
impl AiAdapter for UnavailableAi {
    async fn complete(&self, _req: AiRequest<'_>) -> Result<String, String> {
        Err("AI adapter not configured".to_string())
    }
}
