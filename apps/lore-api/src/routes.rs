use std::{collections::BTreeMap, convert::Infallible};

use axum::{
	Json, Router,
	extract::{Path, State},
	http::StatusCode,
	response::{
		IntoResponse, Response,
		sse::{Event, KeepAlive, Sse},
	},
	routing::{get, post},
};
use futures::{Stream, StreamExt, future, stream};
use serde::{Deserialize, Serialize};

use lore_domain::{
	records::{ChatMessage, CollectionSearch, RetrievedFragment},
	request::{AnswerRequest, AnswerResponse, AnswerSources},
	routing::RoutingDecision,
	trace::AnswerTrace,
};
use lore_service::AnswerStream;
use lore_storage::qdrant::CollectionStats;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
	pub query: String,
	#[serde(default)]
	pub history: Vec<ChatMessage>,
	#[serde(default)]
	pub user_context: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
	pub query: String,
	#[serde(default)]
	pub history: Vec<ChatMessage>,
	#[serde(default)]
	pub user_context: BTreeMap<String, String>,
	/// Routed when absent.
	pub collections: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
	pub collections: Vec<String>,
	pub fragments: Vec<RetrievedFragment>,
	pub sparse_fallback: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CollectionSearchRequest {
	pub query: String,
	#[serde(default)]
	pub user_context: BTreeMap<String, String>,
	pub top_k: Option<u32>,
	pub document_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CollectionEntry {
	pub id: String,
	pub name: String,
	pub description: String,
}

#[derive(Debug, Serialize)]
pub struct CollectionsResponse {
	pub configured: Vec<CollectionEntry>,
	/// Every collection present in the vector store.
	pub stored: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StreamHead {
	trace: AnswerTrace,
	sources: AnswerSources,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}
impl ApiError {
	fn new(
		status: StatusCode,
		error_code: impl Into<String>,
		message: impl Into<String>,
		fields: Option<Vec<String>>,
	) -> Self {
		Self { status, error_code: error_code.into(), message: message.into(), fields }
	}
}
impl From<lore_service::Error> for ApiError {
	fn from(err: lore_service::Error) -> Self {
		match err {
			lore_service::Error::InvalidRequest { message } =>
				json_error(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_REQUEST", message, None),
			lore_service::Error::NotFound { message } =>
				json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message, None),
			lore_service::Error::Qdrant { message } =>
				json_error(StatusCode::BAD_GATEWAY, "STORAGE_ERROR", message, None),
		}
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body =
			ErrorBody { error_code: self.error_code, message: self.message, fields: self.fields };

		(self.status, Json(body)).into_response()
	}
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/collections", get(collections))
		.route("/v1/collections/{id}/stats", get(collection_stats))
		.route("/v1/collections/{id}/search", post(collection_search))
		.route("/v1/route", post(route))
		.route("/v1/search", post(search))
		.route("/v1/answer", post(answer))
		.route("/v1/answer/stream", post(answer_stream))
		.with_state(state)
}

pub fn json_error(
	status: StatusCode,
	code: &str,
	message: impl Into<String>,
	fields: Option<Vec<String>>,
) -> ApiError {
	ApiError::new(status, code, message, fields)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn collections(State(state): State<AppState>) -> Result<Json<CollectionsResponse>, ApiError> {
	let orchestrator = &state.orchestrator;
	let configured = orchestrator
		.cfg
		.collections
		.iter()
		.map(|(id, collection)| CollectionEntry {
			id: id.clone(),
			name: collection.store_name(id).to_string(),
			description: collection.description.clone(),
		})
		.collect();
	let stored = orchestrator.search.list_collections().await?;

	Ok(Json(CollectionsResponse { configured, stored }))
}

async fn collection_stats(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<CollectionStats>, ApiError> {
	let stats = state.orchestrator.search.collection_stats(&id).await?;

	Ok(Json(stats))
}

async fn collection_search(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(payload): Json<CollectionSearchRequest>,
) -> Result<Json<CollectionSearch>, ApiError> {
	require_query(&payload.query)?;

	let orchestrator = &state.orchestrator;
	let top_k = payload.top_k.unwrap_or(orchestrator.cfg.retrieval.top_k);
	let found = orchestrator
		.search
		.search_collection(
			&payload.query,
			&id,
			&payload.user_context,
			top_k,
			payload.document_type.as_deref(),
		)
		.await;

	Ok(Json(found))
}

async fn route(
	State(state): State<AppState>,
	Json(payload): Json<RouteRequest>,
) -> Result<Json<RoutingDecision>, ApiError> {
	require_query(&payload.query)?;

	let decision = state
		.orchestrator
		.router
		.route(&payload.query, &payload.history, &payload.user_context)
		.await;

	Ok(Json(decision))
}

async fn search(
	State(state): State<AppState>,
	Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
	require_query(&payload.query)?;

	let orchestrator = &state.orchestrator;
	let collections = match payload.collections {
		Some(collections) => collections,
		None =>
			orchestrator
				.router
				.route(&payload.query, &payload.history, &payload.user_context)
				.await
				.collections,
	};
	let found = orchestrator
		.search
		.search_multiple_collections(&payload.query, &collections, &payload.user_context, None)
		.await;

	Ok(Json(SearchResponse {
		collections,
		fragments: found.fragments,
		sparse_fallback: found.sparse_fallback,
	}))
}

async fn answer(
	State(state): State<AppState>,
	Json(payload): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
	require_query(&payload.query)?;

	let response = state.orchestrator.answer(&payload).await;

	Ok(Json(response))
}

/// Server-sent events: one `trace`, then `delta` events in order, then `done`.
async fn answer_stream(
	State(state): State<AppState>,
	Json(payload): Json<AnswerRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
	require_query(&payload.query)?;

	let AnswerStream { trace, sources, deltas } = state.orchestrator.answer_stream(&payload).await;
	let head = Event::default().event("trace").json_data(StreamHead { trace, sources }).map_err(
		|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", err.to_string(), None),
	)?;
	let events = stream::once(future::ready(head))
		.chain(deltas.map(|text| Event::default().event("delta").data(text)))
		.chain(stream::once(future::ready(Event::default().event("done").data(""))))
		.map(Ok);

	Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn require_query(query: &str) -> Result<(), ApiError> {
	if query.trim().is_empty() {
		return Err(json_error(
			StatusCode::UNPROCESSABLE_ENTITY,
			"INVALID_REQUEST",
			"query must be non-empty.",
			Some(vec!["$.query".to_string()]),
		));
	}

	Ok(())
}
