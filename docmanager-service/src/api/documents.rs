//! Document API endpoints.
//!
//! Upload, listing, metadata updates, tag associations, summaries and
//! tag-similarity search.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::StatusCode,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{Document, DocumentTag, Summary};
use crate::error::{ProcessingError, ServiceError};
use crate::ingestion::resolve_content_type;
use crate::service::{DocumentSearchResult, DocumentUpdate, UploadRequest};
use crate::storage::PresignedUrl;

use super::AppState;

const DEFAULT_SEARCH_TOP_K: usize = 5;

/// List documents query parameters
#[derive(Deserialize)]
pub struct ListDocumentsParams {
    pub user_id: Option<i64>,
}

/// Tag-similarity search request
#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
}

/// List the documents owned by a user
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDocumentsParams>,
) -> Result<Json<Vec<Document>>, ServiceError> {
    let user_id = params
        .user_id
        .unwrap_or(state.service.config.api.default_user_id);
    Ok(Json(state.service.list_documents(user_id)?))
}

/// Upload a new document
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Document>, ServiceError> {
    let max = state.service.config.limits.max_document_size_bytes;
    let rejected = |e: MultipartError| multipart_error(e, max);

    let mut file: Option<(Bytes, String, Option<String>)> = None;
    let mut filename_override: Option<String> = None;
    let mut description: Option<String> = None;
    let mut user_id: Option<i64> = None;

    while let Some(field) = multipart.next_field().await.map_err(rejected)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(rejected)?;
                file = Some((data, filename, content_type));
            }
            "filename" => {
                let value = field.text().await.map_err(rejected)?;
                filename_override = Some(value).filter(|v| !v.trim().is_empty());
            }
            "description" => {
                let value = field.text().await.map_err(rejected)?;
                description = Some(value).filter(|v| !v.trim().is_empty());
            }
            "user_id" => {
                let value = field.text().await.map_err(rejected)?;
                let parsed = value
                    .trim()
                    .parse()
                    .map_err(|_| ServiceError::InvalidRequest {
                        message: format!("user_id must be an integer, got '{}'", value),
                    })?;
                user_id = Some(parsed);
            }
            _ => {}
        }
    }

    let (data, original_name, declared_type) =
        file.ok_or_else(|| ServiceError::InvalidRequest {
            message: "No file provided".to_string(),
        })?;

    let filename = filename_override.unwrap_or(original_name);
    let content_type = resolve_content_type(declared_type.as_deref(), &filename);

    let document = state
        .service
        .upload_document(UploadRequest {
            data,
            filename,
            content_type,
            description,
            user_id,
        })
        .await?;

    Ok(Json(document))
}

fn multipart_error(error: MultipartError, max: u64) -> ServiceError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::Processing(ProcessingError::UploadTooLarge { max })
    } else {
        ServiceError::InvalidRequest {
            message: error.body_text(),
        }
    }
}

/// Documents reached through the tags nearest to a query
pub async fn search_documents_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<DocumentSearchResult>, ServiceError> {
    let top_k = request.top_k.unwrap_or(DEFAULT_SEARCH_TOP_K);
    let result = state
        .service
        .search_documents(&request.query, top_k)
        .await?;
    Ok(Json(result))
}

/// Get a document with its tags
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ServiceError> {
    Ok(Json(state.service.get_document(&id)?))
}

/// Partially update a document
pub async fn update_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<DocumentUpdate>,
) -> Result<Json<Document>, ServiceError> {
    Ok(Json(state.service.update_document(&id, update)?))
}

/// Delete a document and its stored bytes
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ServiceError> {
    Ok(Json(state.service.delete_document(&id).await?))
}

/// Presigned link to the stored file
pub async fn view_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PresignedUrl>, ServiceError> {
    Ok(Json(state.service.view_document(&id)?))
}

/// Generate and store a fresh summary
pub async fn summarize_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Summary>, ServiceError> {
    Ok(Json(state.service.summarize_document(&id).await?))
}

pub async fn list_summaries_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Summary>>, ServiceError> {
    Ok(Json(state.service.list_summaries(&id)?))
}

pub async fn associate_tag_handler(
    State(state): State<Arc<AppState>>,
    Path((id, tag_id)): Path<(String, String)>,
) -> Result<Json<DocumentTag>, ServiceError> {
    Ok(Json(state.service.associate(&id, &tag_id)?))
}

pub async fn unassociate_tag_handler(
    State(state): State<Arc<AppState>>,
    Path((id, tag_id)): Path<(String, String)>,
) -> Result<Json<DocumentTag>, ServiceError> {
    Ok(Json(state.service.unassociate(&id, &tag_id)?))
}

/// Documents carrying a tag
pub async fn list_tag_documents_handler(
    State(state): State<Arc<AppState>>,
    Path(tag_id): Path<String>,
) -> Result<Json<Vec<Document>>, ServiceError> {
    Ok(Json(state.service.list_documents_for_tag(&tag_id)?))
}
