use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use super::{ChannelSender, DeliveryError};
use crate::config::WhatsAppConfig;
use crate::models::{Channel, MessagePayload};

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9][0-9]{6,14}$").unwrap());

/// Sends messages through the WhatsApp Cloud (Graph) API.
pub struct WhatsAppSender {
    client: reqwest::Client,
    config: WhatsAppConfig,
}

impl WhatsAppSender {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build reqwest client"),
            config,
        }
    }

    fn messages_url(&self, phone_number_id: &str) -> String {
        format!(
            "{}/{}/{}/messages",
            self.config.api_base.trim_end_matches('/'),
            self.config.api_version,
            phone_number_id
        )
    }
}

/// Graph API request body for a single message.
pub fn message_body(recipient: &str, payload: &MessagePayload) -> Value {
    match payload {
        MessagePayload::Text { body } => json!({
            "messaging_product": "whatsapp",
            "to": recipient,
            "type": "text",
            "text": { "body": body },
        }),
        MessagePayload::Template {
            name,
            language,
            parameters,
        } => {
            let components = if parameters.is_empty() {
                json!([])
            } else {
                json!([{
                    "type": "body",
                    "parameters": parameters
                        .iter()
                        .map(|p| json!({ "type": "text", "text": p }))
                        .collect::<Vec<_>>(),
                }])
            };
            json!({
                "messaging_product": "whatsapp",
                "to": recipient,
                "type": "template",
                "template": {
                    "name": name,
                    "language": { "code": language },
                    "components": components,
                },
            })
        }
    }
}

pub fn is_valid_recipient(recipient: &str) -> bool {
    PHONE_RE.is_match(recipient)
}

#[async_trait]
impl ChannelSender for WhatsAppSender {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    async fn send(&self, recipient: &str, payload: &MessagePayload) -> Result<(), DeliveryError> {
        let (Some(token), Some(phone_number_id)) = (
            self.config.access_token.as_deref(),
            self.config.phone_number_id.as_deref(),
        ) else {
            return Err(DeliveryError::NotConfigured(
                "WHATSAPP_ACCESS_TOKEN and WHATSAPP_PHONE_NUMBER_ID must be set".to_string(),
            ));
        };

        if !is_valid_recipient(recipient) {
            return Err(DeliveryError::Rejected(format!(
                "invalid recipient phone number: {recipient}"
            )));
        }

        let resp = self
            .client
            .post(self.messages_url(phone_number_id))
            .bearer_auth(token)
            .json(&message_body(recipient, payload))
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("WhatsApp request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!("WhatsApp message accepted for {recipient}");
            return Ok(());
        }

        let body = resp
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(512)
            .collect::<String>();

        Err(DeliveryError::from_status(status.as_u16(), &body))
    }
}
