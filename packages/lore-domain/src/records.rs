use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub role: String,
	pub content: String,
}
impl ChatMessage {
	pub fn system(content: impl Into<String>) -> Self {
		Self { role: "system".to_string(), content: content.into() }
	}

	pub fn user(content: impl Into<String>) -> Self {
		Self { role: "user".to_string(), content: content.into() }
	}

	pub fn assistant(content: impl Into<String>) -> Self {
		Self { role: "assistant".to_string(), content: content.into() }
	}
}

/// A chunk returned by dense or sparse retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedFragment {
	pub text: String,
	pub score: f32,
	/// Logical collection identifier the fragment was retrieved from.
	pub collection: String,
	#[serde(default)]
	pub metadata: Map<String, Value>,
	pub doc_id: Option<String>,
	pub chunk_index: Option<u32>,
}
impl RetrievedFragment {
	/// Builds a fragment from a stored chunk payload.
	///
	/// Reads `text` (falling back to `chunk_text`), `metadata`, `doc_id` (payload or
	/// `metadata.doc_id`) and `chunk_index`.
	pub fn from_payload(payload: &Map<String, Value>, score: f32, collection: &str) -> Self {
		let text = payload
			.get("text")
			.and_then(Value::as_str)
			.or_else(|| payload.get("chunk_text").and_then(Value::as_str))
			.unwrap_or_default()
			.to_string();
		let metadata = payload.get("metadata").and_then(Value::as_object).cloned().unwrap_or_default();
		let doc_id = payload
			.get("doc_id")
			.and_then(Value::as_str)
			.or_else(|| metadata.get("doc_id").and_then(Value::as_str))
			.filter(|id| !id.is_empty())
			.map(str::to_string);
		let chunk_index = payload
			.get("chunk_index")
			.or_else(|| metadata.get("chunk_index"))
			.and_then(Value::as_u64)
			.and_then(|index| u32::try_from(index).ok());

		Self { text, score, collection: collection.to_string(), metadata, doc_id, chunk_index }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
	/// Dense and sparse lists were fused.
	Hybrid,
	/// Sparse retrieval was disabled by configuration.
	DenseOnly,
	/// Sparse retrieval failed and dense results were used directly.
	SparseFallback,
	/// Dense retrieval failed and the sparse list was used alone.
	SparseOnly,
}

/// The ranked output of one collection search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSearch {
	pub fragments: Vec<RetrievedFragment>,
	pub mode: RetrievalMode,
}

/// A full source document resolved from the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentDocument {
	pub doc_id: String,
	pub text: String,
	pub title: String,
	pub source_path: String,
	pub collection: String,
	#[serde(with = "time::serde::rfc3339::option")]
	pub last_modified: Option<OffsetDateTime>,
	#[serde(default)]
	pub metadata: Map<String, Value>,
}

/// A hit from a per-collection summary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryHit {
	pub doc_id: String,
	pub score: f32,
	pub collection: String,
	pub title: String,
	pub source_path: String,
	pub summary: String,
}
