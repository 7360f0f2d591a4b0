pub mod sms;
pub mod whatsapp;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{Channel, MessagePayload};

/// Why a single delivery attempt did not go through.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// Network failure, timeout, 5xx, 408 or 429. Worth retrying.
    Transient(String),
    /// The provider refused the message itself (4xx, malformed recipient).
    Rejected(String),
    /// Credentials or other settings for the channel are missing.
    NotConfigured(String),
    /// No working sender exists for the channel.
    Unsupported(String),
}

impl DeliveryError {
    /// Retrying cannot change the outcome.
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Rejected(_))
    }

    /// Classify a non-2xx provider response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("provider responded with HTTP {status}: {body}");
        match status {
            408 | 429 => DeliveryError::Transient(message),
            400..=499 => DeliveryError::Rejected(message),
            _ => DeliveryError::Transient(message),
        }
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Transient(msg) => write!(f, "transient: {msg}"),
            DeliveryError::Rejected(msg) => write!(f, "rejected: {msg}"),
            DeliveryError::NotConfigured(msg) => write!(f, "not configured: {msg}"),
            DeliveryError::Unsupported(msg) => write!(f, "unsupported: {msg}"),
        }
    }
}

/// One delivery attempt over a single transport. Implementations never retry.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, recipient: &str, payload: &MessagePayload) -> Result<(), DeliveryError>;
}

pub struct ChannelRegistry {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            senders: HashMap::new(),
        }
    }

    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) {
        self.senders.insert(sender.channel(), sender);
    }

    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn ChannelSender>> {
        self.senders.get(&channel)
    }

    pub async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        payload: &MessagePayload,
    ) -> Result<(), DeliveryError> {
        match self.get(channel) {
            Some(sender) => sender.send(recipient, payload).await,
            None => Err(DeliveryError::Unsupported(format!(
                "no sender registered for channel {channel}"
            ))),
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
