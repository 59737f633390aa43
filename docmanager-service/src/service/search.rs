//! Tag-based document search and retrieval-augmented answers.

use serde::Serialize;
use tracing::{debug, info};

use super::DocManagerService;
use super::prompts::{NO_CONTEXT_ANSWER, RAG_SYSTEM_PROMPT, rag_context, rag_prompt};
use crate::db::{Document, DocumentEmbedding, Tag};
use crate::error::{ServiceError, ServiceResult};

/// Documents reached through the tags nearest to a query
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSearchResult {
    pub documents: Vec<Document>,
    pub tags: Vec<Tag>,
}

/// One retrieved passage and how close it was
#[derive(Debug, Clone, Serialize)]
pub struct ContextChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_text: String,
    pub distance: f32,
    pub similarity_score: f32,
}

impl ContextChunk {
    fn new(embedding: DocumentEmbedding, distance: f32) -> Self {
        Self {
            id: embedding.id,
            document_id: embedding.document_id,
            chunk_text: embedding.chunk_text,
            distance,
            similarity_score: 1.0 / (1.0 + distance),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub query: String,
    pub answer: String,
    pub context_chunks: Vec<ContextChunk>,
}

fn validate_query(query: &str, top_k: usize) -> ServiceResult<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ServiceError::InvalidRequest {
            message: "query must not be empty".to_string(),
        });
    }
    if top_k == 0 {
        return Err(ServiceError::InvalidRequest {
            message: "top_k must be at least 1".to_string(),
        });
    }
    Ok(query)
}

impl DocManagerService {
    /// Documents carrying any of the `top_k` tags nearest to the query.
    pub async fn search_documents(
        &self,
        query: &str,
        top_k: usize,
    ) -> ServiceResult<DocumentSearchResult> {
        let query = validate_query(query, top_k)?;
        let embedding = self.embedder.embed(query).await?;

        let tags: Vec<Tag> = self
            .db
            .nearest_tags(&embedding, top_k)?
            .into_iter()
            .map(|(tag, _)| tag)
            .collect();

        let tag_ids: Vec<String> = tags.iter().map(|t| t.id.clone()).collect();
        let documents = self.db.list_documents_for_tags(&tag_ids)?;

        debug!(
            query = %query,
            tags = tags.len(),
            documents = documents.len(),
            "Searched documents by tag similarity"
        );

        Ok(DocumentSearchResult { documents, tags })
    }

    /// Answer a question from the nearest document texts.
    pub async fn rag_query(
        &self,
        query: &str,
        top_k: usize,
        include_tags: bool,
    ) -> ServiceResult<RagAnswer> {
        let question = validate_query(query, top_k)?;
        let embedding = self.embedder.embed(question).await?;

        let context_chunks: Vec<ContextChunk> = self
            .db
            .nearest_document_embeddings(&embedding, top_k)?
            .into_iter()
            .map(|(chunk, distance)| ContextChunk::new(chunk, distance))
            .collect();

        if context_chunks.is_empty() {
            info!(query = %question, "No context found for question");
            return Ok(RagAnswer {
                query: question.to_string(),
                answer: NO_CONTEXT_ANSWER.to_string(),
                context_chunks,
            });
        }

        let tags = if include_tags {
            self.db
                .nearest_tags(&embedding, top_k)?
                .into_iter()
                .map(|(tag, _)| tag)
                .collect()
        } else {
            Vec::new()
        };

        let passages: Vec<&str> = context_chunks
            .iter()
            .map(|c| c.chunk_text.as_str())
            .collect();
        let context = rag_context(&tags, &passages);
        let prompt = rag_prompt(question, &context, self.config.ollama.max_prompt_chars);

        let answer = self.generator.generate(RAG_SYSTEM_PROMPT, &prompt).await?;

        info!(
            query = %question,
            chunks = context_chunks.len(),
            tags = tags.len(),
            "Answered question from documents"
        );

        Ok(RagAnswer {
            query: question.to_string(),
            answer: answer.trim().to_string(),
            context_chunks,
        })
    }
}
