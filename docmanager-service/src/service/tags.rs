//! Tag management and similarity matching.

use serde::Deserialize;
use tracing::{info, warn};

use super::{DocManagerService, deserialize_some};
use crate::db::Tag;
use crate::embeddings::cosine_similarity;
use crate::error::{ServiceError, ServiceResult, format_error_chain};

/// Partial tag update
#[derive(Debug, Default, Deserialize)]
pub struct TagUpdate {
    pub label: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
}

/// The known tag a candidate label resolves to, if any.
///
/// A case-insensitive label match wins outright. Otherwise the most similar
/// embedded tag is taken when its cosine similarity reaches `threshold`.
pub fn find_matching_tag<'a>(
    label: &str,
    embedding: &[f32],
    known: &'a [Tag],
    threshold: f32,
) -> Option<&'a Tag> {
    if let Some(exact) = known.iter().find(|t| t.label.eq_ignore_ascii_case(label)) {
        return Some(exact);
    }

    known
        .iter()
        .filter_map(|tag| {
            let score = cosine_similarity(embedding, tag.embedding.as_deref()?);
            Some((tag, score))
        })
        .filter(|(_, score)| *score >= threshold)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(tag, _)| tag)
}

fn normalize_label(label: &str) -> ServiceResult<&str> {
    let label = label.trim();
    if label.is_empty() {
        return Err(ServiceError::InvalidRequest {
            message: "label must not be empty".to_string(),
        });
    }
    Ok(label)
}

impl DocManagerService {
    /// Create a tag with the embedding of its label.
    pub async fn create_tag(&self, label: &str, description: Option<&str>) -> ServiceResult<Tag> {
        let label = normalize_label(label)?;

        if self.db.get_tag_by_label(label)?.is_some() {
            return Err(ServiceError::DuplicateTag {
                label: label.to_string(),
            });
        }

        let embedding = self.embedder.embed(label).await?;
        let tag = self.db.insert_tag(label, description, Some(&embedding))?;

        info!(tag_id = %tag.id, label = %tag.label, "Tag created");
        Ok(tag)
    }

    pub fn get_tag(&self, id: &str) -> ServiceResult<Tag> {
        self.db.get_tag(id)?.ok_or_else(|| ServiceError::TagNotFound {
            tag_id: id.to_string(),
        })
    }

    pub fn list_tags(&self) -> ServiceResult<Vec<Tag>> {
        self.db.list_tags()
    }

    /// Rename or redescribe a tag. A new label is re-embedded.
    pub async fn update_tag(&self, id: &str, update: TagUpdate) -> ServiceResult<Tag> {
        let current = self.get_tag(id)?;

        let label = update.label.as_deref().map(normalize_label).transpose()?;
        let label = label.filter(|l| *l != current.label);

        let embedding = match label {
            Some(label) => {
                if let Some(other) = self.db.get_tag_by_label(label)?
                    && other.id != current.id
                {
                    return Err(ServiceError::DuplicateTag {
                        label: label.to_string(),
                    });
                }
                Some(self.embedder.embed(label).await?)
            }
            None => None,
        };

        self.db
            .update_tag(
                id,
                label,
                update.description.as_ref().map(|d| d.as_deref()),
                embedding.as_deref(),
            )?
            .ok_or_else(|| ServiceError::TagNotFound {
                tag_id: id.to_string(),
            })
    }

    /// Delete a tag; its documents keep their other tags.
    pub fn delete_tag(&self, id: &str) -> ServiceResult<Tag> {
        let tag = self.db.delete_tag(id)?.ok_or_else(|| ServiceError::TagNotFound {
            tag_id: id.to_string(),
        })?;

        info!(tag_id = %id, label = %tag.label, "Tag deleted");
        Ok(tag)
    }

    /// Embed tags stored without a vector. Returns how many were filled in.
    pub async fn backfill_tag_embeddings(&self) -> ServiceResult<usize> {
        let missing = self.db.list_tags_without_embedding()?;
        let mut filled = 0;

        for tag in missing {
            match self.embedder.embed(&tag.label).await {
                Ok(embedding) => {
                    if self.db.set_tag_embedding(&tag.id, &embedding)? {
                        filled += 1;
                    }
                }
                Err(e) => {
                    warn!(tag_id = %tag.id, error = %format_error_chain(&e), "Failed to embed tag");
                }
            }
        }

        if filled > 0 {
            info!(count = filled, "Backfilled tag embeddings");
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::embeddings::tests::FakeEmbedder;
    use crate::service::tests::{harness, harness_with};
    use chrono::Utc;

    fn tag(label: &str, embedding: Option<Vec<f32>>) -> Tag {
        Tag {
            id: label.to_string(),
            label: label.to_string(),
            description: None,
            embedding,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_exact_label_wins_regardless_of_embedding() {
        let known = vec![tag("Finance", Some(vec![0.0, 1.0]))];
        let matched = find_matching_tag("finance", &[1.0, 0.0], &known, 0.99);
        assert_eq!(matched.map(|t| t.id.as_str()), Some("Finance"));
    }

    #[test]
    fn test_best_match_above_threshold() {
        let known = vec![
            tag("budget", Some(vec![0.6, 0.8])),
            tag("machine learning", Some(vec![1.0, 0.1])),
            tag("unembedded", None),
        ];

        let matched = find_matching_tag("ml", &[1.0, 0.0], &known, 0.5);
        assert_eq!(matched.map(|t| t.label.as_str()), Some("machine learning"));

        assert!(find_matching_tag("ml", &[0.0, -1.0], &known, 0.5).is_none());
    }

    #[tokio::test]
    async fn test_create_tag_embeds_label_and_rejects_duplicates() {
        let h = harness();
        let tag = h.service.create_tag("  Finance ", Some("money")).await.unwrap();
        assert_eq!(tag.label, "Finance");
        assert_eq!(tag.embedding.as_ref().map(Vec::len), Some(32));

        let err = h.service.create_tag("FINANCE", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateTag { .. }));

        let err = h.service.create_tag("   ", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_update_tag_reembeds_on_rename() {
        let embedder = FakeEmbedder::new(2)
            .with("finance", vec![1.0, 0.0])
            .with("accounting", vec![0.0, 1.0]);
        let h = harness_with(AppConfig::default(), embedder);

        let tag = h.service.create_tag("finance", None).await.unwrap();
        let update: TagUpdate =
            serde_json::from_str(r#"{"label": "accounting", "description": "books"}"#).unwrap();
        let updated = h.service.update_tag(&tag.id, update).await.unwrap();

        assert_eq!(updated.label, "accounting");
        assert_eq!(updated.description.as_deref(), Some("books"));
        assert_eq!(updated.embedding, Some(vec![0.0, 1.0]));
    }

    #[tokio::test]
    async fn test_update_tag_to_taken_label() {
        let h = harness();
        h.service.create_tag("finance", None).await.unwrap();
        let other = h.service.create_tag("legal", None).await.unwrap();

        let update = TagUpdate {
            label: Some("Finance".to_string()),
            ..Default::default()
        };
        let err = h.service.update_tag(&other.id, update).await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateTag { .. }));
    }

    #[tokio::test]
    async fn test_backfill_fills_missing_embeddings() {
        let h = harness();
        h.service.db.insert_tag("legacy", None, None).unwrap();
        h.service.create_tag("current", None).await.unwrap();

        assert_eq!(h.service.backfill_tag_embeddings().await.unwrap(), 1);
        assert!(h.service.db.list_tags_without_embedding().unwrap().is_empty());
        assert_eq!(h.service.backfill_tag_embeddings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_tag() {
        let h = harness();
        let tag = h.service.create_tag("finance", None).await.unwrap();
        h.service.delete_tag(&tag.id).unwrap();
        assert!(matches!(
            h.service.get_tag(&tag.id).unwrap_err(),
            ServiceError::TagNotFound { .. }
        ));
    }
}
