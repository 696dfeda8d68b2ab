pub mod answer;
pub mod rerank;
pub mod router;
pub mod search;
pub mod summary;

mod error;

pub use answer::{AnswerOrchestrator, AnswerStream};
pub use error::{Error, Result};
pub use rerank::{RerankOutcome, Reranker};
pub use router::QueryRouter;
pub use search::{MultiSearch, SearchEngine};
pub use summary::SummaryGatedRetriever;

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use serde_json::{Map, Value};

use lore_config::{EmbeddingProviderConfig, LlmProviderConfig, ProviderConfig};
use lore_domain::records::{ChatMessage, ParentDocument};
use lore_providers::{
	chat::{self, ChatOptions, ChatStream},
	embedding::{self, EmbeddingTask},
	rerank as rerank_api,
};
use lore_storage::qdrant::{self as qdrant_store, CollectionStats, QdrantStore, ScoredPayload};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Exact-match payload conditions, as `(payload key, value)` pairs.
pub type PayloadConditions = [(String, String)];

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
		task: EmbeddingTask,
	) -> BoxFuture<'a, lore_providers::Result<Vec<Vec<f32>>>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	/// Warm-up call issued once before the first rerank.
	fn probe<'a>(&'a self, cfg: &'a ProviderConfig) -> BoxFuture<'a, lore_providers::Result<()>>;

	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, lore_providers::Result<Vec<f32>>>;
}

pub trait ChatProvider
where
	Self: Send + Sync,
{
	fn chat<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
		options: ChatOptions,
	) -> BoxFuture<'a, lore_providers::Result<String>>;

	fn chat_stream<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
		options: ChatOptions,
	) -> BoxFuture<'a, lore_providers::Result<ChatStream>>;
}

pub trait VectorIndex
where
	Self: Send + Sync,
{
	fn query<'a>(
		&'a self,
		collection: &'a str,
		vector: Vec<f32>,
		limit: u64,
		conditions: &'a PayloadConditions,
	) -> BoxFuture<'a, lore_storage::Result<Vec<ScoredPayload>>>;

	fn collection_info<'a>(
		&'a self,
		collection: &'a str,
	) -> BoxFuture<'a, lore_storage::Result<CollectionStats>>;

	fn list_collections<'a>(&'a self) -> BoxFuture<'a, lore_storage::Result<Vec<String>>>;
}

pub trait SparseIndex
where
	Self: Send + Sync,
{
	fn query<'a>(
		&'a self,
		collection: &'a str,
		text: &'a str,
		limit: u64,
		conditions: &'a PayloadConditions,
	) -> BoxFuture<'a, lore_storage::Result<Vec<ScoredPayload>>>;
}

pub trait SummaryIndex
where
	Self: Send + Sync,
{
	fn query<'a>(
		&'a self,
		summary_collection: &'a str,
		vector: Vec<f32>,
		limit: u64,
	) -> BoxFuture<'a, lore_storage::Result<Vec<ScoredPayload>>>;
}

pub trait DocumentStore
where
	Self: Send + Sync,
{
	fn put<'a>(
		&'a self,
		doc_id: &'a str,
		text: &'a str,
		metadata: &'a Map<String, Value>,
	) -> BoxFuture<'a, lore_storage::Result<()>>;

	fn get<'a>(
		&'a self,
		doc_id: &'a str,
	) -> BoxFuture<'a, lore_storage::Result<Option<ParentDocument>>>;

	fn batch_get<'a>(
		&'a self,
		doc_ids: &'a [String],
	) -> BoxFuture<'a, lore_storage::Result<HashMap<String, ParentDocument>>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub rerank: Arc<dyn RerankProvider>,
	pub chat: Arc<dyn ChatProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		rerank: Arc<dyn RerankProvider>,
		chat: Arc<dyn ChatProvider>,
	) -> Self {
		Self { embedding, rerank, chat }
	}
}

impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), rerank: provider.clone(), chat: provider }
	}
}

#[derive(Clone)]
pub struct Stores {
	pub vectors: Arc<dyn VectorIndex>,
	pub sparse: Arc<dyn SparseIndex>,
	pub summaries: Arc<dyn SummaryIndex>,
	pub documents: Arc<dyn DocumentStore>,
}
impl Stores {
	pub fn new(
		vectors: Arc<dyn VectorIndex>,
		sparse: Arc<dyn SparseIndex>,
		summaries: Arc<dyn SummaryIndex>,
		documents: Arc<dyn DocumentStore>,
	) -> Self {
		Self { vectors, sparse, summaries, documents }
	}

	/// Every index backed by one Qdrant deployment.
	pub fn qdrant(store: Arc<QdrantStore>) -> Self {
		Self {
			vectors: store.clone(),
			sparse: store.clone(),
			summaries: store.clone(),
			documents: store,
		}
	}
}

struct DefaultProviders;

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
		task: EmbeddingTask,
	) -> BoxFuture<'a, lore_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts, task))
	}
}

impl RerankProvider for DefaultProviders {
	fn probe<'a>(&'a self, cfg: &'a ProviderConfig) -> BoxFuture<'a, lore_providers::Result<()>> {
		Box::pin(rerank_api::probe(cfg))
	}

	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, lore_providers::Result<Vec<f32>>> {
		Box::pin(rerank_api::rerank(cfg, query, docs))
	}
}

impl ChatProvider for DefaultProviders {
	fn chat<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
		options: ChatOptions,
	) -> BoxFuture<'a, lore_providers::Result<String>> {
		Box::pin(chat::chat(cfg, messages, options))
	}

	fn chat_stream<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
		options: ChatOptions,
	) -> BoxFuture<'a, lore_providers::Result<ChatStream>> {
		Box::pin(chat::chat_stream(cfg, messages, options))
	}
}

impl VectorIndex for QdrantStore {
	fn query<'a>(
		&'a self,
		collection: &'a str,
		vector: Vec<f32>,
		limit: u64,
		conditions: &'a PayloadConditions,
	) -> BoxFuture<'a, lore_storage::Result<Vec<ScoredPayload>>> {
		let filter = qdrant_store::match_filter(
			conditions.iter().map(|(key, value)| (key.as_str(), value.as_str())),
		);

		Box::pin(self.query_dense(collection, vector, limit, filter))
	}

	fn collection_info<'a>(
		&'a self,
		collection: &'a str,
	) -> BoxFuture<'a, lore_storage::Result<CollectionStats>> {
		Box::pin(QdrantStore::collection_info(self, collection))
	}

	fn list_collections<'a>(&'a self) -> BoxFuture<'a, lore_storage::Result<Vec<String>>> {
		Box::pin(QdrantStore::list_collections(self))
	}
}

impl SparseIndex for QdrantStore {
	fn query<'a>(
		&'a self,
		collection: &'a str,
		text: &'a str,
		limit: u64,
		conditions: &'a PayloadConditions,
	) -> BoxFuture<'a, lore_storage::Result<Vec<ScoredPayload>>> {
		let filter = qdrant_store::match_filter(
			conditions.iter().map(|(key, value)| (key.as_str(), value.as_str())),
		);

		Box::pin(self.query_bm25(collection, text, limit, filter))
	}
}

impl SummaryIndex for QdrantStore {
	fn query<'a>(
		&'a self,
		summary_collection: &'a str,
		vector: Vec<f32>,
		limit: u64,
	) -> BoxFuture<'a, lore_storage::Result<Vec<ScoredPayload>>> {
		Box::pin(self.query_summaries(summary_collection, vector, limit))
	}
}

impl DocumentStore for QdrantStore {
	fn put<'a>(
		&'a self,
		doc_id: &'a str,
		text: &'a str,
		metadata: &'a Map<String, Value>,
	) -> BoxFuture<'a, lore_storage::Result<()>> {
		Box::pin(self.put_document(doc_id, text, metadata))
	}

	fn get<'a>(
		&'a self,
		doc_id: &'a str,
	) -> BoxFuture<'a, lore_storage::Result<Option<ParentDocument>>> {
		Box::pin(self.get_document(doc_id))
	}

	fn batch_get<'a>(
		&'a self,
		doc_ids: &'a [String],
	) -> BoxFuture<'a, lore_storage::Result<HashMap<String, ParentDocument>>> {
		Box::pin(self.batch_get_documents(doc_ids))
	}
}
