//! Retrieval-augmented question answering.

use axum::{Json, extract::State};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::service::RagAnswer;

use super::AppState;

#[derive(Deserialize)]
pub struct RagRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_include_tags")]
    pub include_tags: bool,
}

fn default_top_k() -> usize {
    5
}

fn default_include_tags() -> bool {
    true
}

pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RagRequest>,
) -> Result<Json<RagAnswer>, ServiceError> {
    let answer = state
        .service
        .rag_query(&request.query, request.top_k, request.include_tags)
        .await?;
    Ok(Json(answer))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::tests::{app, json_request, send};
    use crate::db::documents::tests::new_document;
    use crate::service::tests::harness;

    #[tokio::test]
    async fn test_query_returns_answer_and_chunks() {
        let h = harness();
        h.service
            .db
            .insert_document(&new_document("doc", 1, "application/pdf"))
            .unwrap();
        let embedding = h.service.embedder.embed("revenue growth").await.unwrap();
        h.service
            .db
            .upsert_document_embedding("doc", "Revenue grew 10%.", &embedding)
            .unwrap();

        let (status, body) = send(
            app(&h),
            json_request("POST", "/api/v1/rag/query", json!({"query": "revenue growth"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["query"], "revenue growth");
        assert_eq!(body["answer"], "- point one\n- point two");
        assert_eq!(body["context_chunks"][0]["document_id"], "doc");
        assert_eq!(body["context_chunks"][0]["similarity_score"], 1.0);
    }

    #[tokio::test]
    async fn test_query_validation() {
        let h = harness();
        let (status, body) = send(
            app(&h),
            json_request("POST", "/api/v1/rag/query", json!({"query": "", "top_k": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_request");
    }
}
