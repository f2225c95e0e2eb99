//! Wiring: builds the store, providers, and services from a [`Config`].
//!
//! Every component receives its capabilities through its constructor, so
//! the same assembly works with test doubles.

use std::sync::Arc;

use anyhow::Result;

use knowdesk_core::completion::{CompletionOptions, CompletionProvider};
use knowdesk_core::store::Store;

use crate::agents::{AgentContext, AgentRegistry, AgentRouter};
use crate::answer::AnswerSynthesizer;
use crate::batch::EmbeddingBatcher;
use crate::config::Config;
use crate::db;
use crate::ingest::{IngestPipeline, IngestService};
use crate::migrate;
use crate::provider::{create_completer, create_embedder};
use crate::retrieve::Retriever;
use crate::sqlite_store::SqliteStore;

pub struct Services {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub embedder: Arc<EmbeddingBatcher>,
    pub completer: Arc<dyn CompletionProvider>,
}

impl Services {
    /// Open the database (applying migrations) and build the providers.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = Self::open_store(config).await?;
        let provider = create_embedder(&config.embedding)?;
        Ok(Self::assemble(
            config.clone(),
            store,
            Arc::new(EmbeddingBatcher::from_config(provider, &config.embedding)),
            create_completer(&config.generation)?,
        ))
    }

    /// Open the database only. Commands that never embed or generate use
    /// this so they work without provider credentials.
    pub async fn open_store(config: &Config) -> Result<Arc<dyn Store>> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Arc::new(SqliteStore::new(pool)))
    }

    pub fn assemble(
        config: Config,
        store: Arc<dyn Store>,
        embedder: Arc<EmbeddingBatcher>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
            completer,
        }
    }

    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: self.config.generation.temperature,
            max_tokens: Some(self.config.generation.max_tokens),
        }
    }

    pub fn retriever(&self) -> Retriever {
        Retriever::new(self.store.clone(), self.embedder.clone())
    }

    pub fn synthesizer(&self) -> AnswerSynthesizer {
        AnswerSynthesizer::new(
            self.retriever(),
            self.completer.clone(),
            self.completion_options(),
        )
        .with_limits(
            self.config.retrieval.top_k,
            self.config.retrieval.preview_chars,
        )
    }

    pub fn ingest_service(&self) -> IngestService {
        IngestService::new(Arc::new(IngestPipeline::new(
            self.store.clone(),
            self.embedder.clone(),
            self.config.chunking.options(),
            self.config.ingest.clone(),
        )))
    }

    pub fn router(&self) -> AgentRouter {
        AgentRouter::new(
            AgentContext {
                llm: self.completer.clone(),
                options: self.completion_options(),
                knowledge: Some(Arc::new(self.synthesizer())),
            },
            AgentRegistry::builtin(),
        )
    }
}
