use std::sync::Arc;

use lore_config::Config;
use lore_domain::records::{ParentDocument, SummaryHit};
use lore_storage::{payload, qdrant};

use crate::{DocumentStore, EmbeddingProvider, Providers, Stores, SummaryIndex, search};

/// Document-level retrieval through per-collection summary indexes.
#[derive(Clone)]
pub struct SummaryGatedRetriever {
	cfg: Arc<Config>,
	embedding: Arc<dyn EmbeddingProvider>,
	summaries: Arc<dyn SummaryIndex>,
	documents: Arc<dyn DocumentStore>,
}
impl SummaryGatedRetriever {
	pub fn new(cfg: Arc<Config>, providers: &Providers, stores: &Stores) -> Self {
		Self {
			cfg,
			embedding: providers.embedding.clone(),
			summaries: stores.summaries.clone(),
			documents: stores.documents.clone(),
		}
	}

	/// The best `top_n` summary hits across collections, highest score first.
	pub async fn search_summaries(
		&self,
		query: &str,
		collection_ids: &[String],
		top_n: usize,
	) -> Vec<SummaryHit> {
		let Some(vector) = search::embed_query(&self.cfg, self.embedding.as_ref(), query).await
		else {
			return Vec::new();
		};
		let suffix = &self.cfg.storage.qdrant.summary_suffix;
		let mut hits = Vec::new();

		for collection_id in collection_ids {
			let index = qdrant::summary_collection_name(
				search::physical_name(&self.cfg, collection_id),
				suffix,
			);
			let points = match self.summaries.query(&index, vector.clone(), top_n as u64).await {
				Ok(points) => points,
				Err(err) => {
					tracing::warn!(error = %err, index = %index, "Summary search failed. Skipping.");

					continue;
				},
			};

			hits.extend(points.into_iter().filter_map(|point| {
				let doc_id = payload::payload_str(&point.payload, "doc_id");

				(!doc_id.is_empty()).then(|| SummaryHit {
					doc_id: doc_id.to_string(),
					score: point.score,
					collection: collection_id.clone(),
					title: payload::payload_str(&point.payload, "title").to_string(),
					source_path: payload::payload_str(&point.payload, "source_path").to_string(),
					summary: payload::payload_str(&point.payload, "summary").to_string(),
				})
			}));
		}

		hits.sort_by(|a, b| b.score.total_cmp(&a.score));
		hits.truncate(top_n);

		hits
	}

	/// Distinct document identifiers of the best summary hits, in score order.
	pub async fn doc_ids_from_summaries(
		&self,
		query: &str,
		collection_ids: &[String],
		top_n: usize,
	) -> Vec<String> {
		let hits = self.search_summaries(query, collection_ids, top_n).await;

		distinct_doc_ids(&hits)
	}

	/// Full documents behind the best summary hits. Empty means the gate does not apply.
	pub async fn get_documents_by_summaries(
		&self,
		query: &str,
		collection_ids: &[String],
		top_n: usize,
	) -> Vec<ParentDocument> {
		let hits = self.search_summaries(query, collection_ids, top_n).await;
		let doc_ids = distinct_doc_ids(&hits);

		if doc_ids.is_empty() {
			return Vec::new();
		}

		let documents = resolve_documents(self.documents.as_ref(), &doc_ids).await;

		documents
			.into_iter()
			.map(|mut doc| {
				if doc.collection.is_empty()
					&& let Some(hit) = hits.iter().find(|hit| hit.doc_id == doc.doc_id)
				{
					doc.collection = hit.collection.clone();
				}

				doc
			})
			.collect()
	}
}

fn distinct_doc_ids(hits: &[SummaryHit]) -> Vec<String> {
	let mut doc_ids: Vec<String> = Vec::with_capacity(hits.len());

	for hit in hits {
		if !doc_ids.contains(&hit.doc_id) {
			doc_ids.push(hit.doc_id.clone());
		}
	}

	doc_ids
}

/// Resolves identifiers in the given order. Unknown identifiers are skipped and a store failure
/// resolves nothing.
pub(crate) async fn resolve_documents(
	store: &dyn DocumentStore,
	doc_ids: &[String],
) -> Vec<ParentDocument> {
	let mut found = match store.batch_get(doc_ids).await {
		Ok(found) => found,
		Err(err) => {
			tracing::warn!(error = %err, count = doc_ids.len(), "Document lookup failed.");

			return Vec::new();
		},
	};

	doc_ids.iter().filter_map(|doc_id| found.remove(doc_id)).collect()
}
