//! Full-document store kept in a dedicated Qdrant collection.
//!
//! Points carry a one-dimensional placeholder vector. The point id is the UUID form of the
//! document identifier.

use std::collections::HashMap;

use qdrant_client::{
	Payload,
	qdrant::{
		CreateCollectionBuilder, Distance, GetPointsBuilder, PointId, PointStruct,
		UpsertPointsBuilder, VectorParamsBuilder,
	},
};
use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use lore_domain::{doc_id, records::ParentDocument};

use crate::{Error, Result, payload, qdrant::QdrantStore};

impl QdrantStore {
	pub async fn ensure_docstore(&self) -> Result<()> {
		if self.client.collection_exists(self.docstore_collection.clone()).await? {
			return Ok(());
		}

		self.client
			.create_collection(
				CreateCollectionBuilder::new(self.docstore_collection.clone())
					.vectors_config(VectorParamsBuilder::new(1, Distance::Cosine)),
			)
			.await?;

		Ok(())
	}

	/// Stores a document. `metadata` supplies `source_path`, `title`, `collection_name` and
	/// `last_modified`; the whole map is kept under `metadata`.
	pub async fn put_document(
		&self,
		doc_id: &str,
		text: &str,
		metadata: &Map<String, Value>,
	) -> Result<()> {
		let point_id = doc_id::point_id(doc_id)
			.ok_or_else(|| Error::InvalidArgument(format!("malformed document id {doc_id}")))?;
		let updated_at = OffsetDateTime::now_utc()
			.format(&Rfc3339)
			.map_err(|err| Error::InvalidArgument(err.to_string()))?;
		let mut payload = Payload::new();

		payload.insert("doc_id", doc_id.to_string());
		payload.insert("text", text.to_string());

		for key in ["source_path", "title", "collection_name", "last_modified", "content_type"] {
			payload.insert(key, crate::payload::payload_str(metadata, key).to_string());
		}

		payload.insert("metadata", Value::Object(metadata.clone()));
		payload.insert("updated_at", updated_at);

		let point = PointStruct::new(point_id.to_string(), vec![0.0_f32], payload);

		self.client
			.upsert_points(
				UpsertPointsBuilder::new(self.docstore_collection.clone(), vec![point]).wait(true),
			)
			.await?;

		Ok(())
	}

	pub async fn get_document(&self, doc_id: &str) -> Result<Option<ParentDocument>> {
		let mut found = self.batch_get_documents(&[doc_id.to_string()]).await?;

		Ok(found.remove(doc_id))
	}

	/// Resolves the given ids. Malformed or unknown ids are absent from the result.
	pub async fn batch_get_documents(
		&self,
		doc_ids: &[String],
	) -> Result<HashMap<String, ParentDocument>> {
		let ids: Vec<PointId> = doc_ids
			.iter()
			.filter_map(|id| doc_id::point_id(id))
			.map(|uuid| PointId::from(uuid.to_string()))
			.collect();

		if ids.is_empty() {
			return Ok(HashMap::new());
		}

		let response = self
			.client
			.get_points(
				GetPointsBuilder::new(self.docstore_collection.clone(), ids).with_payload(true),
			)
			.await?;
		let documents = response
			.result
			.into_iter()
			.filter_map(|point| document_from_payload(Map::from(Payload::from(point.payload))))
			.map(|doc| (doc.doc_id.clone(), doc))
			.collect();

		Ok(documents)
	}
}

/// Decodes a docstore payload. `metadata` may be an object or a JSON-encoded string.
pub fn document_from_payload(payload: Map<String, Value>) -> Option<ParentDocument> {
	let doc_id = payload::payload_str(&payload, "doc_id");

	if doc_id.is_empty() {
		return None;
	}

	let metadata = match payload.get("metadata") {
		Some(Value::Object(map)) => map.clone(),
		Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or_default(),
		_ => Map::new(),
	};
	let last_modified =
		OffsetDateTime::parse(payload::payload_str(&payload, "last_modified"), &Rfc3339).ok();

	Some(ParentDocument {
		doc_id: doc_id.to_string(),
		text: payload::payload_str(&payload, "text").to_string(),
		title: payload::payload_str(&payload, "title").to_string(),
		source_path: payload::payload_str(&payload, "source_path").to_string(),
		collection: payload::payload_str(&payload, "collection_name").to_string(),
		last_modified,
		metadata,
	})
}
