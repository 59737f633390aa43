//! Document upload, metadata and associations.

use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{DocManagerService, deserialize_some};
use crate::db::{Document, DocumentTag, NewDocument, StatusField, Tag};
use crate::error::{ProcessingError, ServiceError, ServiceResult, format_error_chain};
use crate::ingestion::{compute_content_hash, extract_text_blocking, unique_object_key};
use crate::queue::DocumentReady;
use crate::status::ProcessingStatus;
use crate::storage::PresignedUrl;

/// Raw upload as received from the client
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub data: Bytes,
    pub filename: String,
    pub content_type: String,
    pub description: Option<String>,
    pub user_id: Option<i64>,
}

/// Partial document update; absent fields are left alone
#[derive(Debug, Default, Deserialize)]
pub struct DocumentUpdate {
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    pub tag_status: Option<ProcessingStatus>,
}

impl DocManagerService {
    /// Store the bytes, record the document and notify the workers.
    pub async fn upload_document(&self, request: UploadRequest) -> ServiceResult<Document> {
        let size = request.data.len() as u64;
        if size == 0 {
            return Err(ServiceError::InvalidRequest {
                message: "Uploaded file is empty".to_string(),
            });
        }

        let max = self.config.limits.max_document_size_bytes;
        if size > max {
            return Err(ServiceError::Processing(ProcessingError::FileTooLarge {
                size,
                max,
            }));
        }

        let id = Uuid::new_v4();
        let storage_key = unique_object_key(&request.filename, Utc::now(), id);
        let content_hash = compute_content_hash(&request.data);

        self.storage.put(&storage_key, request.data).await?;

        let new_doc = NewDocument {
            id: id.to_string(),
            user_id: request.user_id.unwrap_or(self.config.api.default_user_id),
            storage_key: storage_key.clone(),
            filename: request.filename,
            content_type: request.content_type,
            size_bytes: size,
            content_hash,
            description: request.description,
        };

        let document = match self.db.insert_document(&new_doc) {
            Ok(document) => document,
            Err(e) => {
                self.remove_object(&storage_key).await;
                return Err(e);
            }
        };

        self.publisher
            .publish_document_ready(&DocumentReady {
                document_id: document.id.clone(),
                storage_key: document.storage_key.clone(),
                content_type: document.content_type.clone(),
            })
            .await?;

        metrics::counter!("docmanager_documents_uploaded_total").increment(1);

        info!(
            doc_id = %document.id,
            user_id = document.user_id,
            filename = %document.filename,
            size_bytes = document.size_bytes,
            "Document uploaded"
        );

        Ok(document)
    }

    pub fn get_document(&self, id: &str) -> ServiceResult<Document> {
        self.db
            .get_document(id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: id.to_string(),
            })
    }

    pub fn list_documents(&self, user_id: i64) -> ServiceResult<Vec<Document>> {
        self.db.list_documents_for_user(user_id)
    }

    pub fn list_documents_for_tag(&self, tag_id: &str) -> ServiceResult<Vec<Document>> {
        self.get_tag(tag_id)?;
        self.db.list_documents_for_tag(tag_id)
    }

    /// Apply a partial update. A status change is checked against the
    /// transition table before any metadata is written.
    pub fn update_document(&self, id: &str, update: DocumentUpdate) -> ServiceResult<Document> {
        let document = self.get_document(id)?;

        if let Some(filename) = &update.filename
            && filename.trim().is_empty()
        {
            return Err(ServiceError::InvalidRequest {
                message: "filename must not be empty".to_string(),
            });
        }

        if let Some(next) = update.tag_status {
            document.tag_status.transition(next)?;
            self.db
                .transition_status(id, StatusField::Tag, next, None)?;
        }

        if update.filename.is_some() || update.description.is_some() {
            self.db.update_document_metadata(
                id,
                update.filename.as_deref(),
                update.description.as_ref().map(|d| d.as_deref()),
            )?;
        }

        self.get_document(id)
    }

    /// Delete the row, then the stored object best-effort.
    pub async fn delete_document(&self, id: &str) -> ServiceResult<Document> {
        let document = self
            .db
            .delete_document(id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: id.to_string(),
            })?;

        self.remove_object(&document.storage_key).await;

        info!(doc_id = %id, "Document deleted");
        Ok(document)
    }

    /// Time-limited link to the stored bytes
    pub fn view_document(&self, id: &str) -> ServiceResult<PresignedUrl> {
        let document = self.get_document(id)?;
        self.storage
            .presigned_url(&document.storage_key, self.config.storage.presign_expiry())
    }

    /// Bytes behind a presigned link, once its signature checks out
    pub async fn read_presigned_object(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
    ) -> ServiceResult<Bytes> {
        self.storage.verify_presigned(key, expires, signature)?;
        self.storage.get(key).await
    }

    /// Link a document to a tag. Repeating the call is a no-op.
    pub fn associate(&self, document_id: &str, tag_id: &str) -> ServiceResult<DocumentTag> {
        let (link, inserted) = self.db.link_document_tag(document_id, tag_id)?;
        if inserted {
            info!(doc_id = %document_id, tag_id = %tag_id, "Tag associated");
        }
        Ok(link)
    }

    pub fn unassociate(&self, document_id: &str, tag_id: &str) -> ServiceResult<DocumentTag> {
        self.db
            .unlink_document_tag(document_id, tag_id)?
            .ok_or_else(|| ServiceError::DocumentTagNotFound {
                document_id: document_id.to_string(),
                tag_id: tag_id.to_string(),
            })
    }

    pub fn list_document_tags(&self, document_id: &str) -> ServiceResult<Vec<Tag>> {
        self.get_document(document_id)?;
        self.db.list_tags_for_document(document_id)
    }

    /// Fetch the stored bytes and extract their text.
    pub(crate) async fn document_text(&self, document: &Document) -> ServiceResult<String> {
        let data = self.storage.get(&document.storage_key).await?;
        extract_text_blocking(self.extractor.clone(), document.content_type.clone(), data).await
    }

    async fn remove_object(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            warn!(key = %key, error = %format_error_chain(&e), "Failed to remove stored object");
        }
    }
}
