//! Derives tags for a document and links them, reusing similar tags.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::DocumentJob;
use crate::db::{Document, StatusField, Tag};
use crate::error::{ServiceError, ServiceResult};
use crate::keywords::{Keyword, KeywordExtractor};
use crate::queue::TAGGING_QUEUE;
use crate::service::{DocManagerService, find_matching_tag};
use crate::status::ProcessingStatus;

pub struct TaggingJob {
    service: Arc<DocManagerService>,
    keywords: KeywordExtractor,
}

impl TaggingJob {
    pub fn new(service: Arc<DocManagerService>) -> Self {
        let keywords = KeywordExtractor::new(service.embedder.clone(), &service.config.tagging);
        Self { service, keywords }
    }

    /// Resolve each keyword to a tag and link it. Returns the linked tags.
    fn apply_keywords(
        &self,
        document: &Document,
        keywords: Vec<Keyword>,
    ) -> ServiceResult<Vec<Tag>> {
        let threshold = self.service.config.tagging.similarity_threshold;
        let mut known = self.service.db.list_tags()?;
        let mut linked: Vec<Tag> = Vec::new();

        for keyword in keywords {
            let tag = match find_matching_tag(&keyword.phrase, &keyword.embedding, &known, threshold)
            {
                Some(existing) => {
                    debug!(
                        doc_id = %document.id,
                        candidate = %keyword.phrase,
                        tag = %existing.label,
                        "Candidate matched existing tag"
                    );
                    existing.clone()
                }
                None => {
                    let tag = self.create_tag(&keyword)?;
                    known.push(tag.clone());
                    tag
                }
            };

            self.service.db.link_document_tag(&document.id, &tag.id)?;
            if !linked.iter().any(|t| t.id == tag.id) {
                linked.push(tag);
            }
        }

        Ok(linked)
    }

    /// Insert a tag for a keyword. Losing a race to another consumer that
    /// created the same label yields that consumer's tag.
    fn create_tag(&self, keyword: &Keyword) -> ServiceResult<Tag> {
        match self
            .service
            .db
            .insert_tag(&keyword.phrase, None, Some(&keyword.embedding))
        {
            Ok(tag) => {
                metrics::counter!("docmanager_tags_created_total").increment(1);
                info!(tag_id = %tag.id, label = %tag.label, "Created tag");
                Ok(tag)
            }
            Err(ServiceError::DuplicateTag { label }) => self
                .service
                .db
                .get_tag_by_label(&label)?
                .ok_or(ServiceError::DuplicateTag { label }),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DocumentJob for TaggingJob {
    fn name(&self) -> &'static str {
        "tagging"
    }

    fn queue(&self) -> &'static str {
        TAGGING_QUEUE
    }

    fn status_field(&self) -> StatusField {
        StatusField::Tag
    }

    async fn process(&self, document: &Document) -> ServiceResult<ProcessingStatus> {
        let text = self.service.document_text(document).await?;

        if text.trim().is_empty() {
            info!(doc_id = %document.id, "No text to tag");
            return Ok(ProcessingStatus::Completed);
        }

        let keywords = self.keywords.extract(&text).await?;
        let tags = self.apply_keywords(document, keywords)?;

        info!(
            doc_id = %document.id,
            tags = ?tags.iter().map(|t| t.label.as_str()).collect::<Vec<_>>(),
            "Tagged document"
        );

        Ok(ProcessingStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::embeddings::Embedder;
    use crate::embeddings::tests::FakeEmbedder;
    use crate::error::OllamaError;
    use crate::queue::MessageQueue;
    use crate::service::tests::{harness, harness_with};
    use crate::worker::QueueWorker;
    use crate::worker::tests::upload;

    fn worker_for(service: &Arc<DocManagerService>) -> QueueWorker {
        QueueWorker::new(service.clone(), Arc::new(TaggingJob::new(service.clone())))
    }

    fn labels(service: &DocManagerService, doc_id: &str) -> Vec<String> {
        service.get_document(doc_id).unwrap().tags
    }

    /// Fails every call the way an overloaded model server does
    struct UnavailableEmbedder;

    #[async_trait]
    impl Embedder for UnavailableEmbedder {
        async fn embed(&self, _text: &str) -> ServiceResult<Vec<f32>> {
            Err(ServiceError::Ollama(OllamaError::Generation {
                status: 503,
                message: "model is loading".to_string(),
            }))
        }

        fn model_name(&self) -> &str {
            "unavailable"
        }
    }

    #[tokio::test]
    async fn test_report_tagged_with_distinct_keywords() {
        let embedder = FakeEmbedder::new(3)
            .with("finance", vec![1.0, 0.0, 0.0])
            .with("quarterly", vec![0.0, 1.0, 0.0])
            .with("finance quarterly", vec![0.7, 0.7, 0.0]);
        let mut config = AppConfig::default();
        config.tagging.max_tags = 2;
        let h = harness_with(config, embedder);

        let doc = upload(&h, "report.pdf", "application/pdf", b"Finance quarterly").await;
        assert_eq!(doc.tag_status, ProcessingStatus::Pending);

        assert_eq!(worker_for(&h.service).poll_once().await.unwrap(), 1);

        let doc = h.service.get_document(&doc.id).unwrap();
        assert_eq!(doc.tag_status, ProcessingStatus::Completed);
        assert_eq!(doc.tags, vec!["finance", "quarterly"]);
        assert_eq!(h.service.list_tags().unwrap().len(), 2);
        assert_eq!(h.service.db.queue_depth(TAGGING_QUEUE).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_pdf_skipped_without_tags() {
        let h = harness();
        let doc = upload(&h, "notes.txt", "text/plain", b"finance quarterly").await;

        worker_for(&h.service).poll_once().await.unwrap();

        let doc = h.service.get_document(&doc.id).unwrap();
        assert_eq!(doc.tag_status, ProcessingStatus::Skipped);
        assert!(doc.tags.is_empty());
        assert!(h.service.list_tags().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_near_duplicate_maps_to_existing_tag() {
        let embedder = FakeEmbedder::new(2)
            .with("machine learning", vec![1.0, 0.0])
            .with("ml", vec![0.95, 0.1])
            .with("ml ml", vec![0.9, 0.2]);
        let h = harness_with(AppConfig::default(), embedder);
        let existing = h.service.create_tag("machine learning", None).await.unwrap();

        let doc = upload(&h, "paper.pdf", "application/pdf", b"ML ML ML").await;
        worker_for(&h.service).poll_once().await.unwrap();

        let tags = h.service.list_tags().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id, existing.id);
        assert_eq!(labels(&h.service, &doc.id), vec!["machine learning"]);
    }

    #[tokio::test]
    async fn test_tags_created_in_run_are_reused() {
        let embedder = FakeEmbedder::new(2)
            .with("finance finances.", vec![1.0, 0.0])
            .with("finance", vec![1.0, 0.0])
            .with("finances", vec![0.99, 0.05])
            .with("finance finances", vec![0.98, 0.1]);
        let h = harness_with(AppConfig::default(), embedder);

        let doc = upload(&h, "a.pdf", "application/pdf", b"Finance finances.").await;
        worker_for(&h.service).poll_once().await.unwrap();

        assert_eq!(h.service.list_tags().unwrap().len(), 1);
        assert_eq!(labels(&h.service, &doc.id), vec!["finance"]);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_idempotent() {
        let h = harness();
        let doc = upload(&h, "a.pdf", "application/pdf", b"budget budget budget").await;
        let worker = worker_for(&h.service);
        worker.poll_once().await.unwrap();

        let first = labels(&h.service, &doc.id);
        assert_eq!(first, vec!["budget"]);

        // Same event delivered again after completion
        let body = serde_json::json!({
            "document_id": doc.id,
            "storage_key": doc.storage_key,
            "content_type": doc.content_type,
        })
        .to_string();
        h.service.queue.send(TAGGING_QUEUE, &body).await.unwrap();
        worker.poll_once().await.unwrap();

        // Re-running the job body itself links nothing new
        let job = TaggingJob::new(h.service.clone());
        let document = h.service.get_document(&doc.id).unwrap();
        job.process(&document).await.unwrap();

        assert_eq!(labels(&h.service, &doc.id), first);
        assert_eq!(h.service.db.list_document_tags(&doc.id).unwrap().len(), first.len());
        assert_eq!(h.service.list_tags().unwrap().len(), first.len());
    }

    #[tokio::test]
    async fn test_corrupt_pdf_fails_and_acks() {
        let h = harness();
        let doc = upload(&h, "broken.pdf", "application/pdf", b"CORRUPT%PDF").await;

        worker_for(&h.service).poll_once().await.unwrap();

        let doc = h.service.get_document(&doc.id).unwrap();
        assert_eq!(doc.tag_status, ProcessingStatus::Failed);
        assert!(doc.tag_status_error.unwrap().contains("bad xref table"));
        assert_eq!(h.service.db.queue_depth(TAGGING_QUEUE).unwrap(), 0);
        assert!(h.service.db.list_dead_letters(TAGGING_QUEUE).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_text_completes_without_tags() {
        let h = harness();
        let doc = upload(&h, "scan.pdf", "application/pdf", b"   ").await;

        worker_for(&h.service).poll_once().await.unwrap();

        let doc = h.service.get_document(&doc.id).unwrap();
        assert_eq!(doc.tag_status, ProcessingStatus::Completed);
        assert!(doc.tags.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_redelivered_then_dead_lettered() {
        let mut config = AppConfig::default();
        config.queue.visibility_timeout_secs = 0;
        config.queue.max_receive_count = 2;
        let h = harness_with(config, UnavailableEmbedder);
        let worker = worker_for(&h.service);

        let doc = upload(&h, "a.pdf", "application/pdf", b"finance quarterly").await;

        worker.poll_once().await.unwrap();
        let current = h.service.get_document(&doc.id).unwrap();
        assert_eq!(current.tag_status, ProcessingStatus::Processing);
        assert_eq!(h.service.db.queue_depth(TAGGING_QUEUE).unwrap(), 1);

        worker.poll_once().await.unwrap();
        let current = h.service.get_document(&doc.id).unwrap();
        assert_eq!(current.tag_status, ProcessingStatus::Failed);
        assert!(current.tag_status_error.unwrap().contains("503"));

        let dead = h.service.db.list_dead_letters(TAGGING_QUEUE).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].receive_count, 2);
        assert_eq!(worker.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_delivery_fails_document() {
        let mut config = AppConfig::default();
        config.queue.visibility_timeout_secs = 0;
        config.queue.max_receive_count = 1;
        let h = harness_with(config, FakeEmbedder::new(8));

        let doc = upload(&h, "a.pdf", "application/pdf", b"finance").await;

        // A consumer that received the message and never settled it
        let received = h.service.queue.receive(TAGGING_QUEUE, 1).await.unwrap();
        assert_eq!(received.deliveries.len(), 1);

        assert_eq!(worker_for(&h.service).poll_once().await.unwrap(), 1);

        let doc = h.service.get_document(&doc.id).unwrap();
        assert_eq!(doc.tag_status, ProcessingStatus::Failed);
        assert_eq!(h.service.db.list_dead_letters(TAGGING_QUEUE).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_message_dead_lettered() {
        let h = harness();
        h.service.queue.send(TAGGING_QUEUE, "{oops").await.unwrap();

        worker_for(&h.service).poll_once().await.unwrap();

        let dead = h.service.db.list_dead_letters(TAGGING_QUEUE).unwrap();
        assert_eq!(dead.len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_document_acknowledged() {
        let h = harness();
        let doc = upload(&h, "a.pdf", "application/pdf", b"finance").await;
        h.service.delete_document(&doc.id).await.unwrap();

        worker_for(&h.service).poll_once().await.unwrap();

        assert_eq!(h.service.db.queue_depth(TAGGING_QUEUE).unwrap(), 0);
        assert!(h.service.db.list_dead_letters(TAGGING_QUEUE).unwrap().is_empty());
    }
}
