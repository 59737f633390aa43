//! Serves stored objects behind presigned links.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::ingestion::resolve_content_type;

use super::AppState;

#[derive(Deserialize)]
pub struct PresignedParams {
    pub expires: i64,
    pub signature: String,
}

pub async fn get_object_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(params): Query<PresignedParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let data = state
        .service
        .read_presigned_object(&key, params.expires, &params.signature)
        .await?;

    let content_type = resolve_content_type(None, &key);
    Ok(([(header::CONTENT_TYPE, content_type)], data))
}
