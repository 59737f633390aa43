//! Document CRUD operations and status transitions.

use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::models::{Document, NewDocument, StatusField};
use super::{Database, now_rfc3339};
use crate::error::{DatabaseError, ServiceError, ServiceResult};
use crate::status::ProcessingStatus;

const DOCUMENT_COLUMNS: &str = "d.id, d.user_id, d.storage_key, d.filename, d.content_type, \
     d.size_bytes, d.content_hash, d.description, d.tag_status, d.tag_status_error, \
     d.tag_status_updated_at, d.embedding_status, d.embedding_status_error, \
     d.embedding_status_updated_at, d.created_at, d.updated_at";

impl Database {
    /// Insert a freshly uploaded document; both statuses start `pending`.
    pub fn insert_document(&self, doc: &NewDocument) -> ServiceResult<Document> {
        let conn = self.conn();
        let now = now_rfc3339();

        conn.execute(
            r#"
            INSERT INTO documents (id, user_id, storage_key, filename, content_type, size_bytes, content_hash, description, tag_status, tag_status_updated_at, embedding_status, embedding_status_updated_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?9, ?10, ?10, ?10)
            "#,
            params![
                doc.id,
                doc.user_id,
                doc.storage_key,
                doc.filename,
                doc.content_type,
                doc.size_bytes as i64,
                doc.content_hash,
                doc.description,
                ProcessingStatus::Pending.to_string(),
                now,
            ],
        )
        .map_err(DatabaseError::Query)?;

        fetch_document(&conn, &doc.id)?.ok_or_else(|| ServiceError::DocumentNotFound {
            document_id: doc.id.clone(),
        })
    }

    /// Get a document by ID
    pub fn get_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn();
        fetch_document(&conn, id)
    }

    /// List a user's documents, newest first
    pub fn list_documents_for_user(&self, user_id: i64) -> ServiceResult<Vec<Document>> {
        let conn = self.conn();
        query_documents(
            &conn,
            &format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.user_id = ?1 ORDER BY d.created_at DESC"
            ),
            params![user_id],
        )
    }

    /// List documents carrying a tag, newest first
    pub fn list_documents_for_tag(&self, tag_id: &str) -> ServiceResult<Vec<Document>> {
        self.list_documents_for_tags(&[tag_id.to_string()])
    }

    /// Documents carrying any of the given tags, each listed once
    pub fn list_documents_for_tags(&self, tag_ids: &[String]) -> ServiceResult<Vec<Document>> {
        if tag_ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn();
        let placeholders: Vec<String> = (1..=tag_ids.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.id IN \
             (SELECT document_id FROM document_tags WHERE tag_id IN ({})) \
             ORDER BY d.created_at DESC",
            placeholders.join(", ")
        );

        query_documents(&conn, &sql, params_from_iter(tag_ids.iter()))
    }

    /// Apply a partial metadata update. `description: Some(None)` clears it.
    pub fn update_document_metadata(
        &self,
        id: &str,
        filename: Option<&str>,
        description: Option<Option<&str>>,
    ) -> ServiceResult<bool> {
        let conn = self.conn();
        let now = now_rfc3339();

        let rows = conn
            .execute(
                r#"
                UPDATE documents
                SET filename = COALESCE(?1, filename),
                    description = CASE WHEN ?2 THEN ?3 ELSE description END,
                    updated_at = ?4
                WHERE id = ?5
                "#,
                params![
                    filename,
                    description.is_some(),
                    description.flatten(),
                    now,
                    id
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Move one lifecycle field to `next`, returning the status it left.
    ///
    /// The update is conditional on the status read under the same lock, so a
    /// second process racing on the same row sees zero rows changed and gets
    /// `InvalidTransition` instead of silently overwriting.
    pub fn transition_status(
        &self,
        id: &str,
        field: StatusField,
        next: ProcessingStatus,
        error: Option<&str>,
    ) -> ServiceResult<ProcessingStatus> {
        let conn = self.conn();
        let status_column = field.status_column();

        let current: String = conn
            .query_row(
                &format!("SELECT {status_column} FROM documents WHERE id = ?1"),
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::Query)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: id.to_string(),
            })?;
        let current = ProcessingStatus::from_str(&current).map_err(|_| ServiceError::Internal {
            message: format!("Unknown {} '{}' on document {}", status_column, current, id),
        })?;

        current.transition(next)?;

        let now = now_rfc3339();
        let (next_str, current_str): (&str, &str) = (next.as_ref(), current.as_ref());
        let rows = conn
            .execute(
                &format!(
                    "UPDATE documents SET {status_column} = ?1, {} = ?2, {} = ?3, updated_at = ?3 \
                     WHERE id = ?4 AND {status_column} = ?5",
                    field.error_column(),
                    field.updated_at_column(),
                ),
                params![next_str, error, now, id, current_str],
            )
            .map_err(DatabaseError::Query)?;

        if rows == 0 {
            return Err(ServiceError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        Ok(current)
    }

    /// Delete a document, returning it as it was. Associations, embeddings
    /// and summaries go with it.
    pub fn delete_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn();

        let Some(doc) = fetch_document(&conn, id)? else {
            return Ok(None);
        };

        conn.execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(DatabaseError::Query)?;

        Ok(Some(doc))
    }
}

fn fetch_document(conn: &Connection, id: &str) -> ServiceResult<Option<Document>> {
    let doc = conn
        .query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.id = ?1"),
            params![id],
            |row| Document::from_row(row, vec![]),
        )
        .optional()
        .map_err(DatabaseError::Query)?;

    match doc {
        Some(mut doc) => {
            doc.tags = load_tag_labels(conn, &doc.id)?;
            Ok(Some(doc))
        }
        None => Ok(None),
    }
}

fn query_documents<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> ServiceResult<Vec<Document>> {
    let mut stmt = conn.prepare(sql).map_err(DatabaseError::Query)?;
    let mut docs = stmt
        .query_map(params, |row| Document::from_row(row, vec![]))
        .map_err(DatabaseError::Query)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(DatabaseError::Query)?;

    for doc in &mut docs {
        doc.tags = load_tag_labels(conn, &doc.id)?;
    }

    Ok(docs)
}

fn load_tag_labels(conn: &Connection, document_id: &str) -> ServiceResult<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT t.label FROM tags t JOIN document_tags dt ON dt.tag_id = t.id \
             WHERE dt.document_id = ?1 ORDER BY t.label",
        )
        .map_err(DatabaseError::Query)?;

    let labels = stmt
        .query_map(params![document_id], |row| row.get(0))
        .map_err(DatabaseError::Query)?
        .collect::<Result<Vec<String>, _>>()
        .map_err(DatabaseError::Query)?;

    Ok(labels)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn new_document(id: &str, user_id: i64, content_type: &str) -> NewDocument {
        NewDocument {
            id: id.to_string(),
            user_id,
            storage_key: format!("documents/{id}"),
            filename: format!("{id}.pdf"),
            content_type: content_type.to_string(),
            size_bytes: 42,
            content_hash: "abc".to_string(),
            description: None,
        }
    }

    #[test]
    fn test_insert_starts_pending() {
        let db = Database::open_in_memory().unwrap();
        let doc = db
            .insert_document(&new_document("doc-1", 7, "application/pdf"))
            .unwrap();

        assert_eq!(doc.tag_status, ProcessingStatus::Pending);
        assert_eq!(doc.embedding_status, ProcessingStatus::Pending);
        assert_eq!(doc.user_id, 7);
        assert!(doc.tags.is_empty());
    }

    #[test]
    fn test_list_for_user_only_returns_owned() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document(&new_document("a", 1, "application/pdf"))
            .unwrap();
        db.insert_document(&new_document("b", 2, "application/pdf"))
            .unwrap();

        let docs = db.list_documents_for_user(1).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "a");
    }

    #[test]
    fn test_transition_follows_table() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document(&new_document("doc", 1, "application/pdf"))
            .unwrap();

        let previous = db
            .transition_status("doc", StatusField::Tag, ProcessingStatus::Processing, None)
            .unwrap();
        assert_eq!(previous, ProcessingStatus::Pending);

        db.transition_status(
            "doc",
            StatusField::Tag,
            ProcessingStatus::Failed,
            Some("corrupt"),
        )
        .unwrap();

        let err = db
            .transition_status("doc", StatusField::Tag, ProcessingStatus::Processing, None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { .. }));

        let doc = db.get_document("doc").unwrap().unwrap();
        assert_eq!(doc.tag_status, ProcessingStatus::Failed);
        assert_eq!(doc.tag_status_error.as_deref(), Some("corrupt"));
        // The other lifecycle is untouched
        assert_eq!(doc.embedding_status, ProcessingStatus::Pending);
    }

    #[test]
    fn test_transition_missing_document() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .transition_status("nope", StatusField::Embedding, ProcessingStatus::Processing, None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::DocumentNotFound { .. }));
    }

    #[test]
    fn test_update_metadata_partial() {
        let db = Database::open_in_memory().unwrap();
        let mut doc = new_document("doc", 1, "application/pdf");
        doc.description = Some("draft".to_string());
        db.insert_document(&doc).unwrap();

        assert!(db
            .update_document_metadata("doc", Some("final.pdf"), None)
            .unwrap());
        let doc = db.get_document("doc").unwrap().unwrap();
        assert_eq!(doc.filename, "final.pdf");
        assert_eq!(doc.description.as_deref(), Some("draft"));

        db.update_document_metadata("doc", None, Some(None)).unwrap();
        let doc = db.get_document("doc").unwrap().unwrap();
        assert_eq!(doc.description, None);

        assert!(!db.update_document_metadata("other", Some("x"), None).unwrap());
    }

    #[test]
    fn test_delete_returns_document() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document(&new_document("doc", 1, "application/pdf"))
            .unwrap();

        let deleted = db.delete_document("doc").unwrap().unwrap();
        assert_eq!(deleted.id, "doc");
        assert!(db.get_document("doc").unwrap().is_none());
        assert!(db.delete_document("doc").unwrap().is_none());
    }
}
