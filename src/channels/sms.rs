use async_trait::async_trait;

use super::{ChannelSender, DeliveryError};
use crate::models::{Channel, MessagePayload};

/// Placeholder transport. Every attempt fails so rows follow the normal backoff.
pub struct SmsSender;

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, recipient: &str, _payload: &MessagePayload) -> Result<(), DeliveryError> {
        tracing::warn!("SMS delivery to {recipient} requested but no SMS provider is wired up");
        Err(DeliveryError::Unsupported(
            "SMS delivery is not implemented".to_string(),
        ))
    }
}
