//! Document manager operations shared by the API and the workers.

mod documents;
mod prompts;
mod search;
mod summaries;
mod tags;

pub use documents::{DocumentUpdate, UploadRequest};
pub use search::{ContextChunk, DocumentSearchResult, RagAnswer};
pub use tags::{TagUpdate, find_matching_tag};

use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use tracing::info;

use crate::config::AppConfig;
use crate::db::Database;
use crate::embeddings::Embedder;
use crate::ingestion::TextExtractor;
use crate::ollama::TextGenerator;
use crate::queue::{DocumentEventPublisher, MessageQueue};
use crate::storage::ObjectStore;

/// Main service coordinator
pub struct DocManagerService {
    pub config: Arc<AppConfig>,
    pub db: Arc<Database>,
    pub storage: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn MessageQueue>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn TextGenerator>,
    pub extractor: Arc<dyn TextExtractor>,
    publisher: DocumentEventPublisher,
}

impl DocManagerService {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<Database>,
        storage: Arc<dyn ObjectStore>,
        queue: Arc<dyn MessageQueue>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        info!(
            embedding_model = %embedder.model_name(),
            generation_model = %generator.model_name(),
            "Initializing document manager service"
        );

        let publisher = DocumentEventPublisher::to_workers(queue.clone());

        Self {
            config,
            db,
            storage,
            queue,
            embedder,
            generator,
            extractor,
            publisher,
        }
    }
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent field
/// (`None`) in partial updates.
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::embeddings::tests::FakeEmbedder;
    use crate::error::ServiceResult;
    use crate::ingestion::tests::FakeExtractor;
    use crate::queue::SqliteQueue;
    use crate::storage::{LocalObjectStore, UrlSigner};

    /// Answers every prompt with a canned reply and remembers the prompts.
    pub(crate) struct FakeGenerator {
        pub(crate) reply: String,
        pub(crate) prompts: Mutex<Vec<(String, String)>>,
    }

    impl FakeGenerator {
        pub(crate) fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> Vec<(String, String)> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(&self, system: &str, prompt: &str) -> ServiceResult<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), prompt.to_string()));
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> &str {
            "fake-llm"
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    pub(crate) struct TestHarness {
        pub(crate) service: Arc<DocManagerService>,
        pub(crate) generator: Arc<FakeGenerator>,
        _dir: TempDir,
    }

    pub(crate) fn harness_with(config: AppConfig, embedder: impl Embedder + 'static) -> TestHarness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config;
        if config.storage.signing_secret.is_empty() {
            config.storage.signing_secret = "test-signing-secret".to_string();
        }
        let config = Arc::new(config);
        let db = Arc::new(Database::open_in_memory().unwrap());
        let storage = Arc::new(LocalObjectStore::new(
            dir.path().join("objects"),
            UrlSigner::new(&config.storage.signing_secret).unwrap(),
            config.server.public_base_url(),
        ));
        let queue = Arc::new(SqliteQueue::new(db.clone(), config.queue.clone()));
        let generator = Arc::new(FakeGenerator::new("- point one\n- point two"));

        let service = Arc::new(DocManagerService::new(
            config,
            db,
            storage,
            queue,
            Arc::new(embedder),
            generator.clone(),
            Arc::new(FakeExtractor),
        ));

        TestHarness {
            service,
            generator,
            _dir: dir,
        }
    }

    pub(crate) fn harness() -> TestHarness {
        harness_with(AppConfig::default(), FakeEmbedder::new(32))
    }
}
