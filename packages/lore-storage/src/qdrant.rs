use std::time::Duration;

use qdrant_client::{
	Payload,
	qdrant::{
		CollectionStatus, Condition, CreateCollectionBuilder, Distance, Document, Filter, Modifier,
		Query, QueryPointsBuilder, ScoredPoint, SparseVectorParamsBuilder,
		SparseVectorsConfigBuilder, VectorParamsBuilder, VectorsConfigBuilder,
	},
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::Result;

pub const DENSE_VECTOR_NAME: &str = "dense";
pub const BM25_VECTOR_NAME: &str = "bm25";
pub const BM25_MODEL: &str = "qdrant/bm25";

/// A ranked point with its payload decoded to JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPayload {
	pub payload: Map<String, Value>,
	pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
	pub name: String,
	pub points_count: u64,
	pub status: String,
}

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub vector_dim: u32,
	pub docstore_collection: String,
	pub summary_suffix: String,
}
impl QdrantStore {
	pub fn new(cfg: &lore_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url)
			.timeout(Duration::from_millis(cfg.timeout_ms))
			.build()?;

		Ok(Self {
			client,
			vector_dim: cfg.vector_dim,
			docstore_collection: cfg.docstore_collection.clone(),
			summary_suffix: cfg.summary_suffix.clone(),
		})
	}

	/// Nearest neighbours on the named dense vector.
	pub async fn query_dense(
		&self,
		collection: &str,
		vector: Vec<f32>,
		limit: u64,
		filter: Option<Filter>,
	) -> Result<Vec<ScoredPayload>> {
		let mut search = QueryPointsBuilder::new(collection)
			.query(Query::new_nearest(vector))
			.using(DENSE_VECTOR_NAME)
			.limit(limit)
			.with_payload(true);

		if let Some(filter) = filter {
			search = search.filter(filter);
		}

		let response = self.client.query(search).await?;

		Ok(into_scored(response.result))
	}

	/// Full-text ranking through the server-side BM25 sparse vector.
	pub async fn query_bm25(
		&self,
		collection: &str,
		text: &str,
		limit: u64,
		filter: Option<Filter>,
	) -> Result<Vec<ScoredPayload>> {
		let mut search = QueryPointsBuilder::new(collection)
			.query(Query::new_nearest(Document::new(text.to_string(), BM25_MODEL)))
			.using(BM25_VECTOR_NAME)
			.limit(limit)
			.with_payload(true);

		if let Some(filter) = filter {
			search = search.filter(filter);
		}

		let response = self.client.query(search).await?;

		Ok(into_scored(response.result))
	}

	/// Nearest neighbours in a summary index. Summary indexes carry a single unnamed vector.
	pub async fn query_summaries(
		&self,
		summary_collection: &str,
		vector: Vec<f32>,
		limit: u64,
	) -> Result<Vec<ScoredPayload>> {
		let search = QueryPointsBuilder::new(summary_collection)
			.query(Query::new_nearest(vector))
			.limit(limit)
			.with_payload(true);
		let response = self.client.query(search).await?;

		Ok(into_scored(response.result))
	}

	/// `<collection><suffix>`, without doubling an existing suffix.
	pub fn summary_collection_name(&self, collection: &str) -> String {
		summary_collection_name(collection, &self.summary_suffix)
	}

	pub async fn collection_info(&self, collection: &str) -> Result<CollectionStats> {
		let response = self.client.collection_info(collection.to_string()).await?;
		let info = response
			.result
			.ok_or_else(|| crate::Error::NotFound(format!("collection {collection}")))?;
		let status = CollectionStatus::try_from(info.status)
			.map(|status| status.as_str_name().to_lowercase())
			.unwrap_or_else(|_| "unknown".to_string());

		Ok(CollectionStats {
			name: collection.to_string(),
			points_count: info.points_count.unwrap_or_default(),
			status,
		})
	}

	pub async fn list_collections(&self) -> Result<Vec<String>> {
		let response = self.client.list_collections().await?;
		let mut names: Vec<String> =
			response.collections.into_iter().map(|collection| collection.name).collect();

		names.sort();

		Ok(names)
	}

	/// Creates a chunk collection with the dense and BM25 vectors when it does not exist.
	pub async fn ensure_chunk_collection(&self, collection: &str) -> Result<()> {
		if self.client.collection_exists(collection.to_string()).await? {
			return Ok(());
		}

		let mut vectors_config = VectorsConfigBuilder::default();

		vectors_config.add_named_vector_params(
			DENSE_VECTOR_NAME,
			VectorParamsBuilder::new(self.vector_dim.into(), Distance::Cosine),
		);

		let mut sparse_vectors_config = SparseVectorsConfigBuilder::default();

		sparse_vectors_config.add_named_vector_params(
			BM25_VECTOR_NAME,
			SparseVectorParamsBuilder::default().modifier(Modifier::Idf as i32),
		);

		self.client
			.create_collection(
				CreateCollectionBuilder::new(collection)
					.vectors_config(vectors_config)
					.sparse_vectors_config(sparse_vectors_config),
			)
			.await?;

		Ok(())
	}

	/// Creates a summary index with a single unnamed dense vector when it does not exist.
	pub async fn ensure_summary_collection(&self, summary_collection: &str) -> Result<()> {
		if self.client.collection_exists(summary_collection.to_string()).await? {
			return Ok(());
		}

		self.client
			.create_collection(
				CreateCollectionBuilder::new(summary_collection)
					.vectors_config(VectorParamsBuilder::new(self.vector_dim.into(), Distance::Cosine)),
			)
			.await?;

		Ok(())
	}
}

pub fn summary_collection_name(collection: &str, suffix: &str) -> String {
	if collection.ends_with(suffix) {
		collection.to_string()
	} else {
		format!("{collection}{suffix}")
	}
}

/// Exact-match filter over payload keys. Empty values are skipped; no conditions yields `None`.
pub fn match_filter<'a, I>(conditions: I) -> Option<Filter>
where
	I: IntoIterator<Item = (&'a str, &'a str)>,
{
	let must: Vec<Condition> = conditions
		.into_iter()
		.filter(|(_, value)| !value.trim().is_empty())
		.map(|(key, value)| Condition::matches(key, value.to_string()))
		.collect();

	if must.is_empty() { None } else { Some(Filter::must(must)) }
}

fn into_scored(points: Vec<ScoredPoint>) -> Vec<ScoredPayload> {
	points
		.into_iter()
		.map(|point| ScoredPayload {
			payload: Map::from(Payload::from(point.payload)),
			score: point.score,
		})
		.collect()
}
