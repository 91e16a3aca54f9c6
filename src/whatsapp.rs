//! Outbound side of the relay: the `Messenger` seam and its WhatsApp Cloud API
//! implementation.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Config;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> anyhow::Result<SendReceipt>;

    async fn mark_read(&self, message_id: &str) -> anyhow::Result<()>;

    async fn send_typing_indicator(&self, message_id: &str) -> anyhow::Result<()>;
}

/// Client for `{api_base}/{phone_number_id}/messages`.
pub struct CloudApiClient {
    http: Client,
    endpoint: String,
    access_token: String,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Deserialize)]
struct SentMessage {
    id: String,
}

impl CloudApiClient {
    pub fn new(api_base: &str, phone_number_id: &str, access_token: &str) -> Self {
        Self {
            http: Client::new(),
            endpoint: format!("{}/{}/messages", api_base, phone_number_id),
            access_token: access_token.to_string(),
        }
    }

    /// Builds a client when every credential is present.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let (Some(token), Some(phone_id), Some(_)) = (
            &config.access_token,
            &config.phone_number_id,
            &config.verify_token,
        ) else {
            return Err(anyhow!(
                "missing configuration: {}",
                config.missing_credentials().join(", ")
            ));
        };
        Ok(Self::new(&config.api_base, phone_id, token))
    }

    async fn post(&self, payload: Value) -> anyhow::Result<Value> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .context("WhatsApp API request failed")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("failed to read WhatsApp API response")?;
        if !status.is_success() {
            return Err(anyhow!(
                "WhatsApp API returned {}: {}",
                status,
                api_error_message(&text)
            ));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }
}

/// Graph error text when the body is the usual error envelope, else the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn text_payload(to: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": { "preview_url": false, "body": body },
    })
}

fn read_payload(message_id: &str, typing: bool) -> Value {
    let mut payload = json!({
        "messaging_product": "whatsapp",
        "status": "read",
        "message_id": message_id,
    });
    if typing {
        payload["typing_indicator"] = json!({ "type": "text" });
    }
    payload
}

#[async_trait]
impl Messenger for CloudApiClient {
    async fn send_text(&self, to: &str, body: &str) -> anyhow::Result<SendReceipt> {
        debug!("Sending text to {}", to);
        let response = self.post(text_payload(to, body)).await?;
        let parsed: SendResponse =
            serde_json::from_value(response).unwrap_or(SendResponse { messages: vec![] });
        Ok(SendReceipt {
            message_id: parsed.messages.into_iter().next().map(|m| m.id),
        })
    }

    async fn mark_read(&self, message_id: &str) -> anyhow::Result<()> {
        self.post(read_payload(message_id, false)).await?;
        Ok(())
    }

    async fn send_typing_indicator(&self, message_id: &str) -> anyhow::Result<()> {
        self.post(read_payload(message_id, true)).await?;
        Ok(())
    }
}
