//! Database model structs.
//!
//! This module contains the data structures for database records.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use serde::{Deserialize, Serialize};

use crate::embeddings::decode_embedding;
use crate::status::ProcessingStatus;

/// Which lifecycle column a worker advances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusField {
    Tag,
    Embedding,
}

impl StatusField {
    pub(crate) fn status_column(&self) -> &'static str {
        match self {
            StatusField::Tag => "tag_status",
            StatusField::Embedding => "embedding_status",
        }
    }

    pub(crate) fn error_column(&self) -> &'static str {
        match self {
            StatusField::Tag => "tag_status_error",
            StatusField::Embedding => "embedding_status_error",
        }
    }

    pub(crate) fn updated_at_column(&self) -> &'static str {
        match self {
            StatusField::Tag => "tag_status_updated_at",
            StatusField::Embedding => "embedding_status_updated_at",
        }
    }

    /// Current status of this field on a document
    pub fn of(&self, document: &Document) -> ProcessingStatus {
        match self {
            StatusField::Tag => document.tag_status,
            StatusField::Embedding => document.embedding_status,
        }
    }
}

/// Document record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub user_id: i64,
    pub storage_key: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tag_status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_status_error: Option<String>,
    pub tag_status_updated_at: DateTime<Utc>,
    pub embedding_status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_status_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_status_updated_at: Option<DateTime<Utc>>,
    /// Labels of the tags attached to this document
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub(crate) fn from_row(row: &Row<'_>, tags: Vec<String>) -> Result<Self, rusqlite::Error> {
        let size_bytes: i64 = row.get(5)?;
        let tag_status_updated_at: String = row.get(10)?;
        let embedding_status_updated_at: Option<String> = row.get(13)?;
        let created_at: String = row.get(14)?;
        let updated_at: String = row.get(15)?;

        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            storage_key: row.get(2)?,
            filename: row.get(3)?,
            content_type: row.get(4)?,
            size_bytes: size_bytes.max(0) as u64,
            content_hash: row.get(6)?,
            description: row.get(7)?,
            tag_status: status_at(row, 8)?,
            tag_status_error: row.get(9)?,
            tag_status_updated_at: parse_timestamp(&tag_status_updated_at),
            embedding_status: status_at(row, 11)?,
            embedding_status_error: row.get(12)?,
            embedding_status_updated_at: embedding_status_updated_at
                .as_deref()
                .map(parse_timestamp),
            tags,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

/// Fields supplied by the uploader; everything else starts at its default.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub user_id: i64,
    pub storage_key: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub content_hash: String,
    pub description: Option<String>,
}

/// Tag record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tag {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let embedding: Option<Vec<u8>> = row.get(3)?;
        let created_at: String = row.get(4)?;
        let updated_at: String = row.get(5)?;

        Ok(Self {
            id: row.get(0)?,
            label: row.get(1)?,
            description: row.get(2)?,
            embedding: embedding.as_deref().map(decode_embedding),
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

/// Association between a document and a tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTag {
    pub document_id: String,
    pub tag_id: String,
    pub created_at: DateTime<Utc>,
}

impl DocumentTag {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let created_at: String = row.get(2)?;

        Ok(Self {
            document_id: row.get(0)?,
            tag_id: row.get(1)?,
            created_at: parse_timestamp(&created_at),
        })
    }
}

/// Embedded document text used for retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEmbedding {
    pub id: String,
    pub document_id: String,
    pub chunk_text: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl DocumentEmbedding {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let embedding: Vec<u8> = row.get(3)?;
        let created_at: String = row.get(4)?;

        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            chunk_text: row.get(2)?,
            embedding: decode_embedding(&embedding),
            created_at: parse_timestamp(&created_at),
        })
    }
}

/// Generated document summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl Summary {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let created_at: String = row.get(4)?;

        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            content: row.get(2)?,
            model: row.get(3)?,
            created_at: parse_timestamp(&created_at),
        })
    }
}

/// Stored queue message, as seen by operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub queue: String,
    pub body: String,
    pub receive_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_lettered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueueMessage {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let receive_count: i64 = row.get(3)?;
        let dead_lettered_at: Option<String> = row.get(4)?;
        let created_at: String = row.get(6)?;

        Ok(Self {
            id: row.get(0)?,
            queue: row.get(1)?,
            body: row.get(2)?,
            receive_count: receive_count.max(0) as u32,
            dead_lettered_at: dead_lettered_at.as_deref().map(parse_timestamp),
            last_error: row.get(5)?,
            created_at: parse_timestamp(&created_at),
        })
    }
}

fn status_at(row: &Row<'_>, idx: usize) -> Result<ProcessingStatus, rusqlite::Error> {
    let value: String = row.get(idx)?;
    ProcessingStatus::from_str(&value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
