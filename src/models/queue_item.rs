use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

/// Delivery transport for a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_channel", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Whatsapp => "whatsapp",
            Channel::Sms => "sms",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Pending` is the only non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "queue_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Sent,
    Failed,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueueStatus::Pending)
    }
}

/// Channel-specific message content, stored as tagged JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePayload {
    Text {
        body: String,
    },
    Template {
        name: String,
        #[serde(default = "default_language")]
        language: String,
        #[serde(default)]
        parameters: Vec<String>,
    },
}

fn default_language() -> String {
    "en".to_string()
}

/// A stored row. `payload` is raw JSON; [`QueueItem::message`] decodes it.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub recipient: String,
    pub channel: Channel,
    pub payload: Json<serde_json::Value>,
    pub priority: i32,
    pub status: QueueStatus,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// Eligible for a delivery attempt at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending
            && self.next_attempt_at <= now
            && self.claimed_until.is_none_or(|until| until <= now)
    }

    pub fn message(&self) -> Result<MessagePayload, serde_json::Error> {
        serde_json::from_value(self.payload.0.clone())
    }
}

/// Fields supplied by a producer when enqueuing.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub recipient: String,
    pub channel: Channel,
    pub payload: MessagePayload,
    pub priority: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl NewQueueItem {
    pub fn new(recipient: impl Into<String>, channel: Channel, payload: MessagePayload) -> Self {
        Self {
            recipient: recipient.into(),
            channel,
            payload,
            priority: 0,
            next_attempt_at: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct QueueStats {
    pub pending: i64,
    pub due: i64,
    pub sent: i64,
    pub failed: i64,
}
