//! Persisted document summaries.

use rusqlite::params;

use super::models::Summary;
use super::{Database, now_rfc3339};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    pub fn insert_summary(
        &self,
        document_id: &str,
        content: &str,
        model: &str,
    ) -> ServiceResult<Summary> {
        let conn = self.conn();
        let id = uuid::Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO summaries (id, document_id, content, model, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, document_id, content, model, now_rfc3339()],
        )
        .map_err(DatabaseError::Query)?;

        let summary = conn
            .query_row(
                "SELECT id, document_id, content, model, created_at FROM summaries WHERE id = ?1",
                params![id],
                Summary::from_row,
            )
            .map_err(DatabaseError::Query)?;

        Ok(summary)
    }

    /// Summaries of a document, newest first
    pub fn list_summaries(&self, document_id: &str) -> ServiceResult<Vec<Summary>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, content, model, created_at FROM summaries \
                 WHERE document_id = ?1 ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(DatabaseError::Query)?;

        let summaries = stmt
            .query_map(params![document_id], Summary::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(summaries)
    }
}
