//! Queue consumers that advance a document's processing status.
//!
//! Each consumer receives a batch, claims the document (`processing`),
//! runs its job and settles the message by outcome:
//!
//! - success or skip: status set, message acknowledged
//! - transient error: message released for redelivery, or on its last
//!   allowed delivery the document fails and the message is dead-lettered
//! - permanent error: document fails, message acknowledged
//! - undecodable body: dead-lettered untouched

pub mod embedding;
pub mod tagging;

pub use embedding::EmbeddingJob;
pub use tagging::TaggingJob;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strum::IntoStaticStr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::{Delivery, Document, QueueMessage, StatusField};
use crate::error::{ServiceError, ServiceResult, format_error_chain};
use crate::ingestion::is_supported_content_type;
use crate::queue::DocumentReady;
use crate::service::DocManagerService;
use crate::status::ProcessingStatus;

const EXHAUSTED_ERROR: &str = "Maximum deliveries exceeded";

/// The document-specific part of a worker
#[async_trait]
pub trait DocumentJob: Send + Sync {
    /// Label used in logs and metrics
    fn name(&self) -> &'static str;

    fn queue(&self) -> &'static str;

    /// Lifecycle column this job advances
    fn status_field(&self) -> StatusField;

    /// Runs with the document already claimed. Returns the terminal status
    /// to record, `Completed` or `Skipped`.
    async fn process(&self, document: &Document) -> ServiceResult<ProcessingStatus>;
}

/// How one delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Completed,
    Skipped,
    /// Already terminal or gone; acknowledged without work
    Duplicate,
    Released,
    Failed,
    DeadLettered,
    Malformed,
}

/// Polls one queue and dispatches deliveries to a job
pub struct QueueWorker {
    service: Arc<DocManagerService>,
    job: Arc<dyn DocumentJob>,
}

impl QueueWorker {
    pub fn new(service: Arc<DocManagerService>, job: Arc<dyn DocumentJob>) -> Self {
        Self { service, job }
    }

    /// Receive one batch and settle every message in it. Returns how many
    /// messages were handled, including dead-lettered ones.
    pub async fn poll_once(&self) -> ServiceResult<usize> {
        let received = self
            .service
            .queue
            .receive(self.job.queue(), self.service.config.queue.batch_size)
            .await?;

        let handled = received.deliveries.len() + received.dead_lettered.len();

        for message in &received.dead_lettered {
            self.fail_exhausted(message);
            self.record(Outcome::DeadLettered);
        }

        for delivery in &received.deliveries {
            let outcome = self.handle(delivery).await;
            self.record(outcome);
        }

        Ok(handled)
    }

    /// Start `concurrency` consumer loops that stop between messages once
    /// `shutdown` is cancelled.
    pub fn spawn(
        self: Arc<Self>,
        concurrency: usize,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        (0..concurrency.max(1))
            .map(|consumer| {
                let worker = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker.run(consumer, shutdown).await })
            })
            .collect()
    }

    async fn run(&self, consumer: usize, shutdown: CancellationToken) {
        let worker = self.job.name();
        let poll_interval = self.service.config.queue.poll_interval();
        info!(worker, consumer, "Worker started");

        while !shutdown.is_cancelled() {
            let pause = match self.poll_once().await {
                Ok(0) => Some(poll_interval),
                Ok(_) => None,
                Err(e) => {
                    error!(worker, error = %format_error_chain(&e), "Failed to receive messages");
                    Some(poll_interval.max(Duration::from_secs(1)))
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!(worker, consumer, "Worker stopped");
    }

    async fn handle(&self, delivery: &Delivery) -> Outcome {
        let event: DocumentReady = match delivery.parse() {
            Ok(event) => event,
            Err(e) => {
                let e = ServiceError::from(e);
                warn!(
                    worker = self.job.name(),
                    message_id = %delivery.message_id,
                    error = %format_error_chain(&e),
                    "Dead-lettering undecodable message"
                );
                self.settle(self.service.queue.dead_letter(&delivery.receipt, &e.to_string()))
                    .await;
                return Outcome::Malformed;
            }
        };

        match self.execute(&event).await {
            Ok(outcome) => {
                self.settle(self.service.queue.ack(&delivery.receipt)).await;
                outcome
            }
            Err(e) => self.settle_failure(delivery, &event, e).await,
        }
    }

    async fn execute(&self, event: &DocumentReady) -> ServiceResult<Outcome> {
        let field = self.job.status_field();

        let Some(document) = self.service.db.get_document(&event.document_id)? else {
            warn!(
                worker = self.job.name(),
                doc_id = %event.document_id,
                "Document no longer exists"
            );
            return Ok(Outcome::Duplicate);
        };

        if field.of(&document).is_terminal() {
            debug!(worker = self.job.name(), doc_id = %document.id, "Already processed");
            return Ok(Outcome::Duplicate);
        }

        match self
            .service
            .db
            .transition_status(&document.id, field, ProcessingStatus::Processing, None)
        {
            Ok(_) => {}
            // Settled by another consumer between the read and the claim
            Err(ServiceError::InvalidTransition { .. }) => return Ok(Outcome::Duplicate),
            Err(e) => return Err(e),
        }

        if !is_supported_content_type(&document.content_type) {
            self.service
                .db
                .transition_status(&document.id, field, ProcessingStatus::Skipped, None)?;
            info!(
                worker = self.job.name(),
                doc_id = %document.id,
                content_type = %document.content_type,
                "Skipping unsupported content type"
            );
            return Ok(Outcome::Skipped);
        }

        let status = self.job.process(&document).await?;
        self.service
            .db
            .transition_status(&document.id, field, status, None)?;

        info!(worker = self.job.name(), doc_id = %document.id, status = %status, "Document processed");

        Ok(match status {
            ProcessingStatus::Skipped => Outcome::Skipped,
            _ => Outcome::Completed,
        })
    }

    async fn settle_failure(
        &self,
        delivery: &Delivery,
        event: &DocumentReady,
        error: ServiceError,
    ) -> Outcome {
        let worker = self.job.name();
        let message = format_error_chain(&error);
        let last_delivery =
            delivery.receive_count >= self.service.config.queue.max_receive_count;

        if error.is_transient() && !last_delivery {
            warn!(
                worker,
                doc_id = %event.document_id,
                receive_count = delivery.receive_count,
                error = %message,
                "Transient failure, leaving message for redelivery"
            );
            self.settle(self.service.queue.release(&delivery.receipt, &message))
                .await;
            return Outcome::Released;
        }

        error!(
            worker,
            doc_id = %event.document_id,
            receive_count = delivery.receive_count,
            error = %message,
            "Document processing failed"
        );
        self.mark_failed(&event.document_id, &message);

        if error.is_transient() {
            self.settle(self.service.queue.dead_letter(&delivery.receipt, &message))
                .await;
            Outcome::DeadLettered
        } else {
            self.settle(self.service.queue.ack(&delivery.receipt)).await;
            Outcome::Failed
        }
    }

    /// A message dead-lettered on receive still owes its document a status.
    fn fail_exhausted(&self, message: &QueueMessage) {
        let event: DocumentReady = match serde_json::from_str(&message.body) {
            Ok(event) => event,
            Err(_) => {
                warn!(message_id = %message.id, "Dead-lettered undecodable message");
                return;
            }
        };

        let error = message.last_error.as_deref().unwrap_or(EXHAUSTED_ERROR);
        warn!(
            worker = self.job.name(),
            doc_id = %event.document_id,
            receive_count = message.receive_count,
            "Message exhausted its deliveries"
        );
        self.mark_failed(&event.document_id, error);
    }

    fn mark_failed(&self, document_id: &str, error: &str) {
        match self.service.db.transition_status(
            document_id,
            self.job.status_field(),
            ProcessingStatus::Failed,
            Some(error),
        ) {
            Ok(_) => {}
            Err(ServiceError::InvalidTransition { from, .. }) => {
                debug!(doc_id = %document_id, status = %from, "Document already settled");
            }
            Err(ServiceError::DocumentNotFound { .. }) => {}
            Err(e) => {
                error!(
                    doc_id = %document_id,
                    error = %format_error_chain(&e),
                    "Failed to mark document as failed"
                );
            }
        }
    }

    /// Log a failed queue settlement; the message comes back after its
    /// visibility timeout either way.
    async fn settle(&self, result: impl Future<Output = ServiceResult<bool>>) {
        match result.await {
            Ok(true) => {}
            Ok(false) => {
                debug!(worker = self.job.name(), "Receipt expired before settlement");
            }
            Err(e) => {
                error!(
                    worker = self.job.name(),
                    error = %format_error_chain(&e),
                    "Failed to settle message"
                );
            }
        }
    }

    fn record(&self, outcome: Outcome) {
        let outcome: &'static str = outcome.into();
        metrics::counter!(
            "docmanager_worker_messages_total",
            "worker" => self.job.name(),
            "outcome" => outcome
        )
        .increment(1);
    }
}
