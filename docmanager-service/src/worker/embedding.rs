//! Embeds document text for retrieval.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::DocumentJob;
use crate::db::{Document, StatusField};
use crate::error::ServiceResult;
use crate::keywords::truncate_chars;
use crate::queue::EMBEDDING_QUEUE;
use crate::service::DocManagerService;
use crate::status::ProcessingStatus;

pub struct EmbeddingJob {
    service: Arc<DocManagerService>,
}

impl EmbeddingJob {
    pub fn new(service: Arc<DocManagerService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl DocumentJob for EmbeddingJob {
    fn name(&self) -> &'static str {
        "embedding"
    }

    fn queue(&self) -> &'static str {
        EMBEDDING_QUEUE
    }

    fn status_field(&self) -> StatusField {
        StatusField::Embedding
    }

    async fn process(&self, document: &Document) -> ServiceResult<ProcessingStatus> {
        let text = self.service.document_text(document).await?;
        let text = text.trim();

        if text.is_empty() {
            info!(doc_id = %document.id, "No text to embed");
            return Ok(ProcessingStatus::Skipped);
        }

        let chunk = truncate_chars(text, self.service.config.embeddings.max_input_chars);
        let embedding = self.service.embedder.embed(chunk).await?;

        self.service
            .db
            .upsert_document_embedding(&document.id, chunk, &embedding)?;

        info!(
            doc_id = %document.id,
            chars = chunk.chars().count(),
            dims = embedding.len(),
            "Stored document embedding"
        );

        Ok(ProcessingStatus::Completed)
    }
}
