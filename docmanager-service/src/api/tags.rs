//! Tag API endpoints.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::Tag;
use crate::error::ServiceError;
use crate::service::TagUpdate;

use super::AppState;

/// Request to create a tag
#[derive(Deserialize)]
pub struct CreateTagRequest {
    pub label: String,
    pub description: Option<String>,
}

pub async fn list_tags_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Tag>>, ServiceError> {
    Ok(Json(state.service.list_tags()?))
}

/// Create a tag; its label is embedded for similarity matching
pub async fn create_tag_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateTagRequest>,
) -> Result<Json<Tag>, ServiceError> {
    let tag = state
        .service
        .create_tag(&request.label, request.description.as_deref())
        .await?;
    Ok(Json(tag))
}

pub async fn get_tag_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Tag>, ServiceError> {
    Ok(Json(state.service.get_tag(&id)?))
}

pub async fn update_tag_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<TagUpdate>,
) -> Result<Json<Tag>, ServiceError> {
    Ok(Json(state.service.update_tag(&id, update).await?))
}

pub async fn delete_tag_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Tag>, ServiceError> {
    Ok(Json(state.service.delete_tag(&id)?))
}

/// Tags attached to a document
pub async fn list_document_tags_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Tag>>, ServiceError> {
    Ok(Json(state.service.list_document_tags(&id)?))
}
