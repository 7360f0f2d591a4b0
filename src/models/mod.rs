pub mod queue_item;

pub use queue_item::{Channel, MessagePayload, NewQueueItem, QueueItem, QueueStats, QueueStatus};
