//! Document-tag associations.

use rusqlite::{Connection, OptionalExtension, params};

use super::models::DocumentTag;
use super::{Database, now_rfc3339};
use crate::error::{DatabaseError, ServiceError, ServiceResult};

impl Database {
    /// Attach a tag to a document. Re-linking is a no-op; the second value
    /// reports whether a new row was written.
    pub fn link_document_tag(
        &self,
        document_id: &str,
        tag_id: &str,
    ) -> ServiceResult<(DocumentTag, bool)> {
        let conn = self.conn();

        if !exists(&conn, "SELECT 1 FROM documents WHERE id = ?1", document_id)? {
            return Err(ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            });
        }
        if !exists(&conn, "SELECT 1 FROM tags WHERE id = ?1", tag_id)? {
            return Err(ServiceError::TagNotFound {
                tag_id: tag_id.to_string(),
            });
        }

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO document_tags (document_id, tag_id, created_at) VALUES (?1, ?2, ?3)",
                params![document_id, tag_id, now_rfc3339()],
            )
            .map_err(DatabaseError::Query)?
            > 0;

        let link = fetch_link(&conn, document_id, tag_id)?.ok_or_else(|| {
            ServiceError::DocumentTagNotFound {
                document_id: document_id.to_string(),
                tag_id: tag_id.to_string(),
            }
        })?;

        Ok((link, inserted))
    }

    /// Detach a tag, returning the removed link if there was one
    pub fn unlink_document_tag(
        &self,
        document_id: &str,
        tag_id: &str,
    ) -> ServiceResult<Option<DocumentTag>> {
        let conn = self.conn();

        let Some(link) = fetch_link(&conn, document_id, tag_id)? else {
            return Ok(None);
        };

        conn.execute(
            "DELETE FROM document_tags WHERE document_id = ?1 AND tag_id = ?2",
            params![document_id, tag_id],
        )
        .map_err(DatabaseError::Query)?;

        Ok(Some(link))
    }

    /// Links of one document, ordered by tag id
    pub fn list_document_tags(&self, document_id: &str) -> ServiceResult<Vec<DocumentTag>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT document_id, tag_id, created_at FROM document_tags \
                 WHERE document_id = ?1 ORDER BY tag_id",
            )
            .map_err(DatabaseError::Query)?;

        let links = stmt
            .query_map(params![document_id], DocumentTag::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(links)
    }
}

fn fetch_link(
    conn: &Connection,
    document_id: &str,
    tag_id: &str,
) -> ServiceResult<Option<DocumentTag>> {
    conn.query_row(
        "SELECT document_id, tag_id, created_at FROM document_tags WHERE document_id = ?1 AND tag_id = ?2",
        params![document_id, tag_id],
        DocumentTag::from_row,
    )
    .optional()
    .map_err(|e| DatabaseError::Query(e).into())
}

fn exists(conn: &Connection, sql: &str, id: &str) -> ServiceResult<bool> {
    let found = conn
        .query_row(sql, params![id], |_| Ok(()))
        .optional()
        .map_err(DatabaseError::Query)?;
    Ok(found.is_some())
}
