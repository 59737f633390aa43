use tracing::info;

use super::DocManagerService;
use super::prompts::{SUMMARY_SYSTEM_PROMPT, summary_prompt};
use crate::db::Summary;
use crate::error::{ProcessingError, ServiceResult};

impl DocManagerService {
    /// Generate a fresh summary of a document and keep it.
    pub async fn summarize_document(&self, id: &str) -> ServiceResult<Summary> {
        let document = self.get_document(id)?;
        let text = self.document_text(&document).await?;

        if text.trim().is_empty() {
            return Err(ProcessingError::NothingToSummarize.into());
        }

        let prompt = summary_prompt(&text, self.config.ollama.max_prompt_chars);
        let content = self
            .generator
            .generate(SUMMARY_SYSTEM_PROMPT, &prompt)
            .await?;

        let summary =
            self.db
                .insert_summary(&document.id, content.trim(), self.generator.model_name())?;

        info!(doc_id = %id, chars = summary.content.len(), "Document summarized");
        Ok(summary)
    }

    pub fn list_summaries(&self, id: &str) -> ServiceResult<Vec<Summary>> {
        self.get_document(id)?;
        self.db.list_summaries(id)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::error::{ProcessingError, ServiceError};
    use crate::service::UploadRequest;
    use crate::service::tests::harness;

    fn upload(content_type: &str, body: &'static [u8]) -> UploadRequest {
        UploadRequest {
            data: Bytes::from_static(body),
            filename: "report.pdf".to_string(),
            content_type: content_type.to_string(),
            description: None,
            user_id: None,
        }
    }

    #[tokio::test]
    async fn test_summarize_persists_each_call() {
        let h = harness();
        let doc = h
            .service
            .upload_document(upload("application/pdf", b"Revenue grew in the third quarter."))
            .await
            .unwrap();

        let summary = h.service.summarize_document(&doc.id).await.unwrap();
        assert_eq!(summary.content, "- point one\n- point two");
        assert_eq!(summary.model, "fake-llm");

        h.service.summarize_document(&doc.id).await.unwrap();
        assert_eq!(h.service.list_summaries(&doc.id).unwrap().len(), 2);

        let calls = h.generator.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].1.contains("Revenue grew in the third quarter."));
    }

    #[tokio::test]
    async fn test_summarize_blank_document() {
        let h = harness();
        let doc = h
            .service
            .upload_document(upload("application/pdf", b"   \n  "))
            .await
            .unwrap();

        let err = h.service.summarize_document(&doc.id).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Processing(ProcessingError::NothingToSummarize)
        ));
        assert!(h.generator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_summarize_unsupported_type() {
        let h = harness();
        let doc = h
            .service
            .upload_document(upload("text/plain", b"plain"))
            .await
            .unwrap();

        let err = h.service.summarize_document(&doc.id).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. })
        ));
    }
}
