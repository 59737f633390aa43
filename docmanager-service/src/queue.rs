//! Message queue between the API and the workers.
//!
//! A `DocumentReady` event is published once per upload and fans out to one
//! queue per consumer, so tagging and embedding progress independently.
//! Delivery is at-least-once: a message stays hidden for the visibility
//! timeout after each receive and comes back unless it is acknowledged.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::QueueConfig;
use crate::db::{Database, Delivery, Received};
use crate::error::{QueueError, ServiceResult};

pub const TAGGING_QUEUE: &str = "tagging";
pub const EMBEDDING_QUEUE: &str = "embedding";

/// Published after an upload is stored and recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReady {
    pub document_id: String,
    pub storage_key: String,
    pub content_type: String,
}

impl Delivery {
    /// Decode the message body
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_str(&self.body).map_err(|e| QueueError::MalformedMessage {
            message_id: self.message_id.clone(),
            source: e,
        })
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn send(&self, queue: &str, body: &str) -> ServiceResult<String>;

    async fn receive(&self, queue: &str, max: usize) -> ServiceResult<Received>;

    /// Delete a delivered message. `false` when the receipt went stale.
    async fn ack(&self, receipt: &str) -> ServiceResult<bool>;

    /// Leave a delivered message for redelivery after its visibility timeout
    async fn release(&self, receipt: &str, error: &str) -> ServiceResult<bool>;

    async fn dead_letter(&self, receipt: &str, error: &str) -> ServiceResult<bool>;
}

/// Queue kept in the service database
pub struct SqliteQueue {
    db: Arc<Database>,
    config: QueueConfig,
}

impl SqliteQueue {
    pub fn new(db: Arc<Database>, config: QueueConfig) -> Self {
        Self { db, config }
    }
}

#[async_trait]
impl MessageQueue for SqliteQueue {
    async fn send(&self, queue: &str, body: &str) -> ServiceResult<String> {
        self.db.enqueue_message(queue, body)
    }

    async fn receive(&self, queue: &str, max: usize) -> ServiceResult<Received> {
        self.db.receive_messages(
            queue,
            max,
            self.config.visibility_timeout(),
            self.config.max_receive_count,
        )
    }

    async fn ack(&self, receipt: &str) -> ServiceResult<bool> {
        self.db.ack_message(receipt)
    }

    async fn release(&self, receipt: &str, error: &str) -> ServiceResult<bool> {
        self.db.release_message(receipt, error)
    }

    async fn dead_letter(&self, receipt: &str, error: &str) -> ServiceResult<bool> {
        self.db.dead_letter_message(receipt, error)
    }
}

/// Publishes document events to every subscribed queue
pub struct DocumentEventPublisher {
    queue: Arc<dyn MessageQueue>,
    targets: Vec<String>,
}

impl DocumentEventPublisher {
    pub fn new(queue: Arc<dyn MessageQueue>, targets: Vec<String>) -> Self {
        Self { queue, targets }
    }

    /// Subscribed to both worker queues
    pub fn to_workers(queue: Arc<dyn MessageQueue>) -> Self {
        Self::new(
            queue,
            vec![TAGGING_QUEUE.to_string(), EMBEDDING_QUEUE.to_string()],
        )
    }

    pub async fn publish_document_ready(&self, event: &DocumentReady) -> ServiceResult<()> {
        let body = serde_json::to_string(event).map_err(QueueError::Encode)?;

        for target in &self.targets {
            let message_id = self.queue.send(target, &body).await?;
            debug!(
                doc_id = %event.document_id,
                queue = %target,
                message_id = %message_id,
                "Published document ready event"
            );
        }

        Ok(())
    }
}
