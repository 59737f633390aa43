//! Document embedding storage and retrieval search.

use rusqlite::{OptionalExtension, params};

use super::models::DocumentEmbedding;
use super::{Database, now_rfc3339};
use crate::embeddings::{encode_embedding, l2_distance};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Store the embedding for a document, replacing any earlier one
    pub fn upsert_document_embedding(
        &self,
        document_id: &str,
        chunk_text: &str,
        embedding: &[f32],
    ) -> ServiceResult<()> {
        let conn = self.conn();

        conn.execute(
            r#"
            INSERT INTO document_embeddings (id, document_id, chunk_text, embedding, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(document_id) DO UPDATE SET
                chunk_text = excluded.chunk_text,
                embedding = excluded.embedding,
                created_at = excluded.created_at
            "#,
            params![
                uuid::Uuid::new_v4().to_string(),
                document_id,
                chunk_text,
                encode_embedding(embedding),
                now_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    pub fn get_document_embedding(
        &self,
        document_id: &str,
    ) -> ServiceResult<Option<DocumentEmbedding>> {
        let conn = self.conn();

        let embedding = conn
            .query_row(
                "SELECT id, document_id, chunk_text, embedding, created_at \
                 FROM document_embeddings WHERE document_id = ?1",
                params![document_id],
                DocumentEmbedding::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        Ok(embedding)
    }

    /// Search document embeddings by L2 distance (brute force), nearest first
    pub fn nearest_document_embeddings(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> ServiceResult<Vec<(DocumentEmbedding, f32)>> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, chunk_text, embedding, created_at FROM document_embeddings",
            )
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map([], DocumentEmbedding::from_row)
            .map_err(DatabaseError::Query)?;

        let mut results: Vec<(DocumentEmbedding, f32)> = Vec::new();
        for row in rows {
            let embedding = row.map_err(DatabaseError::Query)?;
            if let Some(distance) = l2_distance(query, &embedding.embedding) {
                results.push((embedding, distance));
            }
        }

        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);

        Ok(results)
    }
}
