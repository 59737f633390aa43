//! Tag CRUD and similarity lookups.

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use super::models::Tag;
use super::{Database, now_rfc3339};
use crate::embeddings::{encode_embedding, l2_distance};
use crate::error::{DatabaseError, ServiceError, ServiceResult};

const TAG_COLUMNS: &str = "t.id, t.label, t.description, t.embedding, t.created_at, t.updated_at";

impl Database {
    /// Insert a tag. A label already present in any casing is a `DuplicateTag`.
    pub fn insert_tag(
        &self,
        label: &str,
        description: Option<&str>,
        embedding: Option<&[f32]>,
    ) -> ServiceResult<Tag> {
        let conn = self.conn();
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();

        conn.execute(
            "INSERT INTO tags (id, label, description, embedding, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, label, description, embedding.map(encode_embedding), now],
        )
        .map_err(|e| duplicate_label_or(e, label))?;

        fetch_tag(&conn, &id)?.ok_or(ServiceError::TagNotFound { tag_id: id })
    }

    /// Get a tag by ID
    pub fn get_tag(&self, id: &str) -> ServiceResult<Option<Tag>> {
        let conn = self.conn();
        fetch_tag(&conn, id)
    }

    /// Case-insensitive label lookup
    pub fn get_tag_by_label(&self, label: &str) -> ServiceResult<Option<Tag>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TAG_COLUMNS} FROM tags t WHERE t.label = ?1"),
            params![label],
            Tag::from_row,
        )
        .optional()
        .map_err(|e| DatabaseError::Query(e).into())
    }

    /// All tags ordered by label
    pub fn list_tags(&self) -> ServiceResult<Vec<Tag>> {
        let conn = self.conn();
        query_tags(
            &conn,
            &format!("SELECT {TAG_COLUMNS} FROM tags t ORDER BY t.label"),
            [],
        )
    }

    /// Tags created before embeddings were computed
    pub fn list_tags_without_embedding(&self) -> ServiceResult<Vec<Tag>> {
        let conn = self.conn();
        query_tags(
            &conn,
            &format!("SELECT {TAG_COLUMNS} FROM tags t WHERE t.embedding IS NULL ORDER BY t.label"),
            [],
        )
    }

    /// Tags attached to a document
    pub fn list_tags_for_document(&self, document_id: &str) -> ServiceResult<Vec<Tag>> {
        let conn = self.conn();
        query_tags(
            &conn,
            &format!(
                "SELECT {TAG_COLUMNS} FROM tags t JOIN document_tags dt ON dt.tag_id = t.id \
                 WHERE dt.document_id = ?1 ORDER BY t.label"
            ),
            params![document_id],
        )
    }

    /// Partial update. A changed label must come with its new embedding.
    pub fn update_tag(
        &self,
        id: &str,
        label: Option<&str>,
        description: Option<Option<&str>>,
        embedding: Option<&[f32]>,
    ) -> ServiceResult<Option<Tag>> {
        let conn = self.conn();
        let now = now_rfc3339();

        let rows = conn
            .execute(
                r#"
                UPDATE tags
                SET label = COALESCE(?1, label),
                    description = CASE WHEN ?2 THEN ?3 ELSE description END,
                    embedding = COALESCE(?4, embedding),
                    updated_at = ?5
                WHERE id = ?6
                "#,
                params![
                    label,
                    description.is_some(),
                    description.flatten(),
                    embedding.map(encode_embedding),
                    now,
                    id
                ],
            )
            .map_err(|e| duplicate_label_or(e, label.unwrap_or_default()))?;

        if rows == 0 {
            return Ok(None);
        }

        fetch_tag(&conn, id)
    }

    /// Store a tag's embedding
    pub fn set_tag_embedding(&self, id: &str, embedding: &[f32]) -> ServiceResult<bool> {
        let conn = self.conn();
        let rows = conn
            .execute(
                "UPDATE tags SET embedding = ?1, updated_at = ?2 WHERE id = ?3",
                params![encode_embedding(embedding), now_rfc3339(), id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Delete a tag and its associations, returning the tag as it was.
    pub fn delete_tag(&self, id: &str) -> ServiceResult<Option<Tag>> {
        let conn = self.conn();

        let Some(tag) = fetch_tag(&conn, id)? else {
            return Ok(None);
        };

        conn.execute("DELETE FROM tags WHERE id = ?1", params![id])
            .map_err(DatabaseError::Query)?;

        Ok(Some(tag))
    }

    /// The `top_k` embedded tags closest to `query` by L2 distance, nearest first
    pub fn nearest_tags(&self, query: &[f32], top_k: usize) -> ServiceResult<Vec<(Tag, f32)>> {
        let conn = self.conn();
        let tags = query_tags(
            &conn,
            &format!("SELECT {TAG_COLUMNS} FROM tags t WHERE t.embedding IS NOT NULL"),
            [],
        )?;

        let mut results: Vec<(Tag, f32)> = tags
            .into_iter()
            .filter_map(|tag| {
                let distance = l2_distance(query, tag.embedding.as_deref()?)?;
                Some((tag, distance))
            })
            .collect();

        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);

        Ok(results)
    }
}

fn fetch_tag(conn: &Connection, id: &str) -> ServiceResult<Option<Tag>> {
    conn.query_row(
        &format!("SELECT {TAG_COLUMNS} FROM tags t WHERE t.id = ?1"),
        params![id],
        Tag::from_row,
    )
    .optional()
    .map_err(|e| DatabaseError::Query(e).into())
}

fn query_tags<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> ServiceResult<Vec<Tag>> {
    let mut stmt = conn.prepare(sql).map_err(DatabaseError::Query)?;
    let tags = stmt
        .query_map(params, Tag::from_row)
        .map_err(DatabaseError::Query)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(DatabaseError::Query)?;

    Ok(tags)
}

fn duplicate_label_or(error: rusqlite::Error, label: &str) -> ServiceError {
    match error.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => ServiceError::DuplicateTag {
            label: label.to_string(),
        },
        _ => DatabaseError::Query(error).into(),
    }
}
