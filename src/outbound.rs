use crate::config::Config;
use std::time::Duration;

/// One message to deliver through the external messaging gateway.
#[derive(Debug, Clone)]
pub struct OutboundMessage<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub content: &'a str,
    pub typing_duration_sec: i64,
}

/// Façade over the messaging-gateway client (spec.md §1, explicitly an
/// external collaborator). `send_real_message = false` is handled by the
/// caller (scheduler/reply engine), which short-circuits to success without
/// ever invoking this trait — so an implementation only has to worry about
/// the one case where a real send is actually wanted.
#[rocket::async_trait]
pub trait OutboundAdapter: Send + Sync {
    async fn send(&self, msg: OutboundMessage<'_>) -> Result<(), String>;
}

/// `reqwest`-backed gateway client, grounded on the teacher's webhook
/// dispatcher (`webhooks::spawn_dispatcher`): a single client built once with
/// a bounded timeout, reused across calls.
pub struct GatewayOutbound {
    client: reqwest::Client,
    base_url: String,
}

impl GatewayOutbound {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.outbound_timeout_secs))
            .build()
            .expect("Failed to build outbound HTTP client");
        GatewayOutbound {
            client,
            base_url: config.outbound_gateway_base_url.clone(),
        }
    }
}

#[rocket::async_trait]
impl OutboundAdapter for GatewayOutbound {
    async fn send(&self, msg: OutboundMessage<'_>) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("OUTBOUND_GATEWAY_BASE_URL is not configured".to_string());
        }

        let body = serde_json::json!({
            "from": msg.from,
            "to": msg.to,
            "message": msg.content,
            "typing_duration_sec": msg.typing_duration_sec,
        });

        let resp = self
            .client
            .post(format!("{}/send", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("gateway returned HTTP {}", resp.status()))
        }
    }
}

/// Always-succeeds adapter for local development and tests where no real
/// gateway is configured.
pub struct NoopOutbound;

#[rocket::async_trait]
impl OutboundAdapter for NoopOutbound {
    async fn send(&self, _msg: OutboundMessage<'_>) -> Result<(), String> {
        Ok(())
    }
}
