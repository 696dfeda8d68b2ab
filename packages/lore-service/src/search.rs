use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;

use lore_config::Config;
use lore_domain::{
	allocation, dedup, fusion,
	records::{CollectionSearch, RetrievalMode, RetrievedFragment},
};
use lore_providers::embedding::EmbeddingTask;
use lore_storage::qdrant::{CollectionStats, ScoredPayload};

use crate::{EmbeddingProvider, Providers, Result, SparseIndex, Stores, VectorIndex};

/// Merged, deduplicated results across collections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiSearch {
	pub fragments: Vec<RetrievedFragment>,
	/// Collections whose sparse retrieval failed and used dense results alone.
	pub sparse_fallback: Vec<String>,
}

/// Hybrid dense plus sparse retrieval over configured collections.
#[derive(Clone)]
pub struct SearchEngine {
	cfg: Arc<Config>,
	embedding: Arc<dyn EmbeddingProvider>,
	vectors: Arc<dyn VectorIndex>,
	sparse: Arc<dyn SparseIndex>,
}
impl SearchEngine {
	pub fn new(cfg: Arc<Config>, providers: &Providers, stores: &Stores) -> Self {
		Self {
			cfg,
			embedding: providers.embedding.clone(),
			vectors: stores.vectors.clone(),
			sparse: stores.sparse.clone(),
		}
	}

	/// The store collection behind a logical identifier. Unknown identifiers map to themselves.
	pub fn physical_name<'a>(&'a self, collection_id: &'a str) -> &'a str {
		physical_name(&self.cfg, collection_id)
	}

	/// Payload conditions from mapped user-context keys and an optional document type.
	pub fn payload_conditions(
		&self,
		user_context: &BTreeMap<String, String>,
		document_type: Option<&str>,
	) -> Vec<(String, String)> {
		let retrieval = &self.cfg.retrieval;
		let mut conditions: Vec<(String, String)> = retrieval
			.filter_mappings
			.iter()
			.filter_map(|(context_key, payload_key)| {
				let value = user_context.get(context_key)?.trim();

				(!value.is_empty()).then(|| (payload_key.clone(), value.to_string()))
			})
			.collect();

		if let Some(document_type) = document_type.map(str::trim).filter(|value| !value.is_empty()) {
			conditions.push((retrieval.document_type_field.clone(), document_type.to_string()));
		}

		conditions
	}

	pub async fn search_collection(
		&self,
		query: &str,
		collection_id: &str,
		user_context: &BTreeMap<String, String>,
		top_k: u32,
		document_type: Option<&str>,
	) -> CollectionSearch {
		let vector = embed_query(&self.cfg, self.embedding.as_ref(), query).await;
		let conditions = self.payload_conditions(user_context, document_type);

		self.search_with_vector(query, vector.as_deref(), collection_id, &conditions, top_k).await
	}

	/// Embeds the query once and searches every collection with its own budget.
	///
	/// Without an explicit budget each collection gets `base_chunks_per_collection`, plus
	/// `priority_boost` when it is listed in `collection_priority`.
	pub async fn search_multiple_collections(
		&self,
		query: &str,
		collection_ids: &[String],
		user_context: &BTreeMap<String, String>,
		budget: Option<&BTreeMap<String, u32>>,
	) -> MultiSearch {
		let retrieval = &self.cfg.retrieval;
		let budget = match budget {
			Some(budget) => budget.clone(),
			None => allocation::chunk_allocation(
				collection_ids,
				retrieval.base_chunks_per_collection,
				retrieval.priority_boost,
				&retrieval.collection_priority,
			),
		};
		let vector = embed_query(&self.cfg, self.embedding.as_ref(), query).await;
		let conditions = self.payload_conditions(user_context, None);
		let mut merged = Vec::new();
		let mut sparse_fallback = Vec::new();

		for collection_id in collection_ids {
			let limit =
				budget.get(collection_id).copied().unwrap_or(retrieval.base_chunks_per_collection);
			let search = self
				.search_with_vector(query, vector.as_deref(), collection_id, &conditions, limit)
				.await;

			tracing::debug!(
				collection = %collection_id,
				mode = ?search.mode,
				count = search.fragments.len(),
				"Collection searched."
			);

			if search.mode == RetrievalMode::SparseFallback {
				sparse_fallback.push(collection_id.clone());
			}

			merged.extend(search.fragments);
		}

		let fragments = dedup::deduplicate(merged, retrieval.dedup_prefix_chars);

		MultiSearch { fragments, sparse_fallback }
	}

	pub async fn collection_stats(&self, collection_id: &str) -> Result<CollectionStats> {
		let stats = self.vectors.collection_info(self.physical_name(collection_id)).await?;

		Ok(stats)
	}

	pub async fn list_collections(&self) -> Result<Vec<String>> {
		let names = self.vectors.list_collections().await?;

		Ok(names)
	}

	async fn search_with_vector(
		&self,
		query: &str,
		vector: Option<&[f32]>,
		collection_id: &str,
		conditions: &[(String, String)],
		limit: u32,
	) -> CollectionSearch {
		let physical = self.physical_name(collection_id);
		let hybrid = self.cfg.retrieval.hybrid_enabled;
		let dense = async {
			let Some(vector) = vector else {
				return None;
			};

			match self.vectors.query(physical, vector.to_vec(), u64::from(limit), conditions).await {
				Ok(points) => Some(into_fragments(points, collection_id)),
				Err(err) => {
					tracing::warn!(error = %err, collection = %collection_id, "Dense retrieval failed.");

					None
				},
			}
		};
		let sparse = async {
			if !hybrid {
				return None;
			}

			match self.sparse.query(physical, query, u64::from(limit), conditions).await {
				Ok(points) => Some(into_fragments(points, collection_id)),
				Err(err) => {
					tracing::warn!(
						error = %err,
						collection = %collection_id,
						"Sparse retrieval failed. Using dense results."
					);

					None
				},
			}
		};
		let (dense, sparse) = tokio::join!(dense, sparse);
		let (mut fragments, mode) = match (dense, sparse) {
			(Some(dense), Some(sparse)) => (
				fusion::reciprocal_rank_fusion(dense, sparse, self.cfg.retrieval.rrf_k),
				RetrievalMode::Hybrid,
			),
			(Some(dense), None) if !hybrid => (dense, RetrievalMode::DenseOnly),
			(Some(dense), None) => (dense, RetrievalMode::SparseFallback),
			(None, Some(sparse)) => (sparse, RetrievalMode::SparseOnly),
			(None, None) if !hybrid => (Vec::new(), RetrievalMode::DenseOnly),
			(None, None) => (Vec::new(), RetrievalMode::SparseFallback),
		};

		fragments.truncate(limit as usize);

		CollectionSearch { fragments, mode }
	}
}

pub(crate) fn physical_name<'a>(cfg: &'a Config, collection_id: &'a str) -> &'a str {
	match cfg.collections.get(collection_id) {
		Some(collection) => collection.store_name(collection_id),
		None => collection_id,
	}
}

/// Embeds a query. Failures and dimension mismatches are logged and yield `None`.
pub(crate) async fn embed_query(
	cfg: &Config,
	provider: &dyn EmbeddingProvider,
	query: &str,
) -> Option<Vec<f32>> {
	let texts = [query.to_string()];
	let vectors = match provider.embed(&cfg.providers.embedding, &texts, EmbeddingTask::Query).await
	{
		Ok(vectors) => vectors,
		Err(err) => {
			tracing::warn!(error = %err, "Query embedding failed.");

			return None;
		},
	};
	let vector = vectors.into_iter().next()?;

	if vector.len() != cfg.storage.qdrant.vector_dim as usize {
		tracing::warn!(
			expected = cfg.storage.qdrant.vector_dim,
			actual = vector.len(),
			"Query embedding has the wrong dimension."
		);

		return None;
	}

	Some(vector)
}

fn into_fragments(points: Vec<ScoredPayload>, collection_id: &str) -> Vec<RetrievedFragment> {
	points
		.into_iter()
		.map(|point| RetrievedFragment::from_payload(&point.payload, point.score, collection_id))
		.collect()
}
