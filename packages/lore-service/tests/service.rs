use std::{
	collections::{BTreeMap, HashMap},
	sync::{
		Arc, Mutex,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};

use futures::{StreamExt, stream::BoxStream};
use serde_json::{Map, Value};

use lore_config::{Config, EmbeddingProviderConfig, LlmProviderConfig, ProviderConfig};
use lore_domain::{
	records::{ChatMessage, ParentDocument, RetrievalMode, RetrievedFragment},
	request::{AnswerRequest, AnswerSources},
	trace::TraceError,
};
use lore_providers::{
	chat::{ChatOptions, ChatStream},
	embedding::EmbeddingTask,
};
use lore_service::{
	AnswerOrchestrator, BoxFuture, ChatProvider, DocumentStore, EmbeddingProvider, Providers,
	RerankProvider, Reranker, SparseIndex, Stores, SummaryIndex, VectorIndex,
};
use lore_storage::qdrant::{CollectionStats, ScoredPayload};

const BASE_CONFIG: &str = r#"
[service]
http_bind = "127.0.0.1:0"
log_level = "info"

[storage.qdrant]
url = "http://127.0.0.1:6334"
vector_dim = 4

[providers.embedding]
provider_id = "stub"
api_base = "http://127.0.0.1"
path = "/embeddings"
model = "embed"
dimensions = 4
timeout_ms = 1000

[providers.rerank]
provider_id = "stub"
api_base = "http://127.0.0.1"
path = "/rerank"
model = "rerank"
timeout_ms = 1000

[providers.llm]
provider_id = "stub"
api_base = "http://127.0.0.1"
path = "/chat/completions"
model = "chat"
temperature = 0.2
timeout_ms = 1000

[collections.recipes]
description = "Kitchen recipes."
keywords = ["recipe", "patty", "ingredient"]

[collections.policies]
description = "Staff policies."
keywords = ["policy", "shift"]

[router]
strategy = "keyword"
default_collections = ["recipes"]

[retrieval]
metadata_display_keys = ["department"]

[retrieval.filter_mappings]
department = "metadata.department"
"#;

const ROUTER_SECTION: &str = r#"
[providers.router]
provider_id = "stub"
api_base = "http://127.0.0.1"
path = "/chat/completions"
model = "router"
temperature = 0.1
timeout_ms = 1000
"#;

fn config() -> Config {
	toml::from_str(BASE_CONFIG).expect("Failed to parse test config.")
}

fn model_routed_config() -> Config {
	let raw = format!("{BASE_CONFIG}{ROUTER_SECTION}").replace("\"keyword\"", "\"model\"");

	toml::from_str(&raw).expect("Failed to parse test config.")
}

fn chunk(text: &str, doc_id: &str, chunk_index: u32, score: f32) -> ScoredPayload {
	let payload = serde_json::json!({
		"text": text,
		"doc_id": doc_id,
		"chunk_index": chunk_index,
		"metadata": { "source_path": format!("{doc_id}.md"), "department": "kitchen" }
	});

	ScoredPayload { payload: payload.as_object().cloned().unwrap_or_default(), score }
}

fn summary_point(doc_id: &str, score: f32) -> ScoredPayload {
	let payload = serde_json::json!({
		"doc_id": doc_id,
		"title": doc_id,
		"source_path": format!("{doc_id}.md"),
		"summary": "Summary."
	});

	ScoredPayload { payload: payload.as_object().cloned().unwrap_or_default(), score }
}

fn document(doc_id: &str, text: &str) -> ParentDocument {
	ParentDocument {
		doc_id: doc_id.to_string(),
		text: text.to_string(),
		title: doc_id.to_string(),
		source_path: format!("{doc_id}.md"),
		collection: String::new(),
		last_modified: None,
		metadata: Map::new(),
	}
}

fn recipe_chunks() -> Vec<ScoredPayload> {
	vec![
		chunk("The Krabby Patty has a secret formula.", "formula", 0, 0.9),
		chunk("Krabby Patty ingredients: bun, patty, pickles.", "ingredients", 0, 0.8),
		chunk("Kelp shakes are blended to order.", "shakes", 0, 0.4),
	]
}

struct StubEmbedding {
	fail: bool,
	calls: Arc<AtomicUsize>,
}
impl StubEmbedding {
	fn new() -> Self {
		Self { fail: false, calls: Arc::new(AtomicUsize::new(0)) }
	}
}
impl EmbeddingProvider for StubEmbedding {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
		_task: EmbeddingTask,
	) -> BoxFuture<'a, lore_providers::Result<Vec<Vec<f32>>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let fail = self.fail;
		let vector = vec![0.5; cfg.dimensions as usize];

		Box::pin(async move {
			if fail {
				return Err(lore_providers::Error::InvalidResponse {
					message: "embedding offline".to_string(),
				});
			}

			Ok(vec![vector; texts.len()])
		})
	}
}

struct StubRerank {
	fail_probe: bool,
	fail_rerank: bool,
	probes: Arc<AtomicUsize>,
}
impl StubRerank {
	fn new() -> Self {
		Self { fail_probe: false, fail_rerank: false, probes: Arc::new(AtomicUsize::new(0)) }
	}
}
impl RerankProvider for StubRerank {
	fn probe<'a>(&'a self, _cfg: &'a ProviderConfig) -> BoxFuture<'a, lore_providers::Result<()>> {
		self.probes.fetch_add(1, Ordering::SeqCst);

		let fail = self.fail_probe;

		Box::pin(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;

			if fail {
				return Err(lore_providers::Error::InvalidResponse {
					message: "reranker offline".to_string(),
				});
			}

			Ok(())
		})
	}

	/// Scores documents mentioning "ingredients" highest, then reverses the input order.
	fn rerank<'a>(
		&'a self,
		_cfg: &'a ProviderConfig,
		_query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, lore_providers::Result<Vec<f32>>> {
		let fail = self.fail_rerank;
		let scores = docs
			.iter()
			.enumerate()
			.map(|(idx, doc)| {
				let boost = if doc.contains("ingredients") { 10.0 } else { 0.0 };

				boost + idx as f32
			})
			.collect();

		Box::pin(async move {
			if fail {
				return Err(lore_providers::Error::InvalidResponse {
					message: "rerank failed".to_string(),
				});
			}

			Ok(scores)
		})
	}
}

/// Sets the flag when the owning stream is dropped.
struct DropFlag(Arc<AtomicBool>);
impl Drop for DropFlag {
	fn drop(&mut self) {
		self.0.store(true, Ordering::SeqCst);
	}
}

#[derive(Default)]
struct StubChat {
	answer: String,
	router_reply: String,
	deltas: Vec<String>,
	/// Keeps the upstream open after the last delta.
	hold_open: bool,
	fail: bool,
	upstream_dropped: Arc<AtomicBool>,
	answer_calls: Arc<AtomicUsize>,
	router_calls: Arc<AtomicUsize>,
	last_messages: Arc<Mutex<Vec<ChatMessage>>>,
	last_options: Arc<Mutex<Option<ChatOptions>>>,
}
impl StubChat {
	fn answering(answer: &str) -> Self {
		Self { answer: answer.to_string(), ..Default::default() }
	}
}
impl ChatProvider for StubChat {
	fn chat<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
		options: ChatOptions,
	) -> BoxFuture<'a, lore_providers::Result<String>> {
		if cfg.model == "router" {
			self.router_calls.fetch_add(1, Ordering::SeqCst);

			let reply = self.router_reply.clone();

			return Box::pin(async move { Ok(reply) });
		}

		self.answer_calls.fetch_add(1, Ordering::SeqCst);
		*self.last_messages.lock().expect("lock poisoned") = messages.to_vec();
		*self.last_options.lock().expect("lock poisoned") = Some(options);

		let fail = self.fail;
		let answer = self.answer.clone();

		Box::pin(async move {
			if fail {
				return Err(lore_providers::Error::InvalidResponse {
					message: "model offline".to_string(),
				});
			}

			Ok(answer)
		})
	}

	fn chat_stream<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_messages: &'a [ChatMessage],
		_options: ChatOptions,
	) -> BoxFuture<'a, lore_providers::Result<ChatStream>> {
		self.answer_calls.fetch_add(1, Ordering::SeqCst);

		let fail = self.fail;
		let hold_open = self.hold_open;
		let deltas = self.deltas.clone();
		let guard = DropFlag(self.upstream_dropped.clone());

		Box::pin(async move {
			if fail {
				return Err(lore_providers::Error::InvalidResponse {
					message: "stream refused".to_string(),
				});
			}

			let tail: BoxStream<'static, lore_providers::Result<String>> = if hold_open {
				futures::stream::pending().boxed()
			} else {
				futures::stream::empty().boxed()
			};
			let stream: ChatStream = Box::pin(
				futures::stream::iter(deltas.into_iter().map(Ok)).chain(tail).map(move |item| {
					let _guard = &guard;

					item
				}),
			);

			Ok(stream)
		})
	}
}

#[derive(Default)]
struct StubVectors {
	points: HashMap<String, Vec<ScoredPayload>>,
	fail: bool,
	calls: Arc<AtomicUsize>,
	conditions: Arc<Mutex<Vec<Vec<(String, String)>>>>,
}
impl StubVectors {
	fn with(collection: &str, points: Vec<ScoredPayload>) -> Self {
		Self { points: HashMap::from([(collection.to_string(), points)]), ..Default::default() }
	}
}
impl VectorIndex for StubVectors {
	fn query<'a>(
		&'a self,
		collection: &'a str,
		_vector: Vec<f32>,
		limit: u64,
		conditions: &'a [(String, String)],
	) -> BoxFuture<'a, lore_storage::Result<Vec<ScoredPayload>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.conditions.lock().expect("lock poisoned").push(conditions.to_vec());

		let fail = self.fail;
		let mut points = self.points.get(collection).cloned().unwrap_or_default();

		points.truncate(limit as usize);

		Box::pin(async move {
			if fail {
				return Err(lore_storage::Error::NotFound("vector index offline".to_string()));
			}

			Ok(points)
		})
	}

	fn collection_info<'a>(
		&'a self,
		collection: &'a str,
	) -> BoxFuture<'a, lore_storage::Result<CollectionStats>> {
		let fail = self.fail;
		let count = self.points.get(collection).map(Vec::len).unwrap_or_default() as u64;

		Box::pin(async move {
			if fail {
				return Err(lore_storage::Error::NotFound(format!("{collection} does not exist.")));
			}

			Ok(CollectionStats {
				name: collection.to_string(),
				points_count: count,
				status: "green".to_string(),
			})
		})
	}

	fn list_collections<'a>(&'a self) -> BoxFuture<'a, lore_storage::Result<Vec<String>>> {
		let mut names: Vec<String> = self.points.keys().cloned().collect();

		names.sort();

		Box::pin(async move { Ok(names) })
	}
}

#[derive(Default)]
struct StubSparse {
	points: HashMap<String, Vec<ScoredPayload>>,
	fail: bool,
}
impl SparseIndex for StubSparse {
	fn query<'a>(
		&'a self,
		collection: &'a str,
		_text: &'a str,
		limit: u64,
		_conditions: &'a [(String, String)],
	) -> BoxFuture<'a, lore_storage::Result<Vec<ScoredPayload>>> {
		let fail = self.fail;
		let mut points = self.points.get(collection).cloned().unwrap_or_default();

		points.truncate(limit as usize);

		Box::pin(async move {
			if fail {
				return Err(lore_storage::Error::NotFound("bm25 unavailable".to_string()));
			}

			Ok(points)
		})
	}
}

#[derive(Default)]
struct StubSummaries {
	points: HashMap<String, Vec<ScoredPayload>>,
	queried: Arc<Mutex<Vec<String>>>,
}
impl SummaryIndex for StubSummaries {
	fn query<'a>(
		&'a self,
		summary_collection: &'a str,
		_vector: Vec<f32>,
		limit: u64,
	) -> BoxFuture<'a, lore_storage::Result<Vec<ScoredPayload>>> {
		self.queried.lock().expect("lock poisoned").push(summary_collection.to_string());

		let found = self.points.get(summary_collection).cloned();

		Box::pin(async move {
			match found {
				Some(mut points) => {
					points.truncate(limit as usize);

					Ok(points)
				},
				None => Err(lore_storage::Error::NotFound(format!("{summary_collection} missing"))),
			}
		})
	}
}

#[derive(Default)]
struct StubDocuments {
	docs: HashMap<String, ParentDocument>,
}
impl StubDocuments {
	fn with(docs: Vec<ParentDocument>) -> Self {
		Self { docs: docs.into_iter().map(|doc| (doc.doc_id.clone(), doc)).collect() }
	}
}
impl DocumentStore for StubDocuments {
	fn put<'a>(
		&'a self,
		_doc_id: &'a str,
		_text: &'a str,
		_metadata: &'a Map<String, Value>,
	) -> BoxFuture<'a, lore_storage::Result<()>> {
		Box::pin(async move { Ok(()) })
	}

	fn get<'a>(
		&'a self,
		doc_id: &'a str,
	) -> BoxFuture<'a, lore_storage::Result<Option<ParentDocument>>> {
		let found = self.docs.get(doc_id).cloned();

		Box::pin(async move { Ok(found) })
	}

	fn batch_get<'a>(
		&'a self,
		doc_ids: &'a [String],
	) -> BoxFuture<'a, lore_storage::Result<HashMap<String, ParentDocument>>> {
		let found = doc_ids
			.iter()
			.filter_map(|id| self.docs.get(id).map(|doc| (id.clone(), doc.clone())))
			.collect();

		Box::pin(async move { Ok(found) })
	}
}

struct Harness {
	vectors: StubVectors,
	sparse: StubSparse,
	summaries: StubSummaries,
	documents: StubDocuments,
	embedding: StubEmbedding,
	rerank: StubRerank,
	chat: StubChat,
}
impl Harness {
	fn new() -> Self {
		Self {
			vectors: StubVectors::with("recipes", recipe_chunks()),
			sparse: StubSparse::default(),
			summaries: StubSummaries::default(),
			documents: StubDocuments::default(),
			embedding: StubEmbedding::new(),
			rerank: StubRerank::new(),
			chat: StubChat::answering("Two all-beef patties."),
		}
	}

	fn build(self, cfg: Config) -> AnswerOrchestrator {
		let stores = Stores::new(
			Arc::new(self.vectors),
			Arc::new(self.sparse),
			Arc::new(self.summaries),
			Arc::new(self.documents),
		);
		let providers =
			Providers::new(Arc::new(self.embedding), Arc::new(self.rerank), Arc::new(self.chat));

		AnswerOrchestrator::with_providers(cfg, stores, providers)
	}
}

fn fragment_texts(sources: &AnswerSources) -> Vec<String> {
	match sources {
		AnswerSources::Fragments(items) => items.iter().map(|item| item.text.clone()).collect(),
		AnswerSources::Documents(items) => items.iter().map(|item| item.text.clone()).collect(),
	}
}

#[tokio::test]
async fn krabby_patty_query_returns_matching_fragment() {
	let harness = Harness::new();
	let answer_calls = harness.chat.answer_calls.clone();
	let last_messages = harness.chat.last_messages.clone();
	let orchestrator = harness.build(config());
	let response = orchestrator.answer(&AnswerRequest::new("Krabby Patty ingredients")).await;

	assert_eq!(response.answer, "Two all-beef patties.");
	assert!(fragment_texts(&response.sources).iter().any(|text| text.contains("Krabby Patty")));
	assert_eq!(response.trace.collections_searched, vec!["recipes".to_string()]);
	assert!(response.trace.routing_used);
	assert!(response.trace.reranking_enabled);
	assert_eq!(response.trace.error, None);
	assert_eq!(response.trace.answer_length, Some("Two all-beef patties.".chars().count()));
	assert_eq!(answer_calls.load(Ordering::SeqCst), 1);

	let messages = last_messages.lock().expect("lock poisoned").clone();

	assert_eq!(messages.first().map(|msg| msg.role.as_str()), Some("system"));
	assert!(
		messages
			.last()
			.is_some_and(|msg| msg.content.contains("[Collection: recipes, Source: formula.md"))
	);
}

#[tokio::test]
async fn unroutable_query_without_defaults_returns_no_results() {
	let mut cfg = config();

	cfg.router.default_collections.clear();

	let harness = Harness::new();
	let answer_calls = harness.chat.answer_calls.clone();
	let orchestrator = harness.build(cfg);
	let response = orchestrator.answer(&AnswerRequest::new("Will it rain in Bikini Bottom?")).await;

	assert_eq!(response.answer, "I couldn't find relevant information to answer your question.");
	assert_eq!(response.trace.error, Some(TraceError::NoResults));
	assert!(response.trace.collections_searched.is_empty());
	assert!(response.sources.is_empty());
	assert_eq!(answer_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn explicit_collections_bypass_routing() {
	let mut harness = Harness::new();

	harness
		.vectors
		.points
		.insert("policies".to_string(), vec![chunk("Shifts start at 9.", "shifts", 0, 0.7)]);

	let router_calls = harness.chat.router_calls.clone();
	let last_options = harness.chat.last_options.clone();
	let orchestrator = harness.build(model_routed_config());
	let request = AnswerRequest {
		collections: Some(vec!["policies".to_string(), "policies".to_string()]),
		..AnswerRequest::new("When does my shift start?")
	};
	let response = orchestrator.answer(&request).await;

	assert_eq!(router_calls.load(Ordering::SeqCst), 0);
	assert!(!response.trace.routing_used);
	assert_eq!(response.trace.routing_reasoning, None);
	assert_eq!(response.trace.collections_searched, vec!["policies".to_string()]);
	assert_eq!(response.trace.token_allocation, 1_024);
	assert_eq!(
		last_options.lock().expect("lock poisoned").map(|options| options.max_tokens),
		Some(1_024)
	);
}

#[tokio::test]
async fn malformed_router_reply_falls_back_to_defaults() {
	let mut harness = Harness::new();

	harness.chat.router_reply = "I think you want recipes.".to_string();

	let router_calls = harness.chat.router_calls.clone();
	let orchestrator = harness.build(model_routed_config());
	let decision =
		orchestrator.router.route("Krabby Patty ingredients", &[], &BTreeMap::new()).await;

	assert_eq!(router_calls.load(Ordering::SeqCst), 1);
	assert_eq!(decision.collections, vec!["recipes".to_string()]);
	assert_eq!(decision.token_allocation, 600);
	assert_eq!(decision.reasoning, "No valid JSON found in response");
}

#[tokio::test]
async fn model_router_reply_is_filtered_and_clamped() {
	let mut harness = Harness::new();

	harness.chat.router_reply = concat!(
		r#"Sure! {"collections": ["policies", "menus", "policies"], "#,
		r#""token_allocation": 5000, "reasoning": "Staff question"}"#
	)
	.to_string();

	let orchestrator = harness.build(model_routed_config());
	let decision =
		orchestrator.router.route("Who covers the night shift?", &[], &BTreeMap::new()).await;

	assert_eq!(decision.collections, vec!["policies".to_string()]);
	assert_eq!(decision.token_allocation, 1_250);
	assert_eq!(decision.reasoning, "Staff question");
}

#[tokio::test]
async fn sparse_failure_is_recorded_in_trace() {
	let mut harness = Harness::new();

	harness.sparse.fail = true;

	let orchestrator = harness.build(config());
	let response = orchestrator.answer(&AnswerRequest::new("Krabby Patty recipe")).await;

	assert_eq!(response.trace.sparse_fallback, vec!["recipes".to_string()]);
	assert!(response.trace.hybrid_enabled);
	assert_eq!(response.trace.total_results, 3);
	assert_eq!(response.trace.error, None);
}

#[tokio::test]
async fn hybrid_search_fuses_dense_and_sparse_lists() {
	let mut harness = Harness::new();

	harness.sparse.points.insert(
		"recipes".to_string(),
		vec![
			chunk("Krabby Patty ingredients: bun, patty, pickles.", "ingredients", 0, 12.0),
			chunk("Fry cooks flip patties twice.", "flipping", 0, 8.0),
		],
	);

	let orchestrator = harness.build(config());
	let search = orchestrator
		.search
		.search_collection("patty", "recipes", &BTreeMap::new(), 20, None)
		.await;
	let texts: Vec<&str> = search.fragments.iter().map(|fragment| fragment.text.as_str()).collect();

	assert_eq!(search.mode, RetrievalMode::Hybrid);
	assert_eq!(texts[0], "Krabby Patty ingredients: bun, patty, pickles.");
	assert_eq!(texts.len(), 4);
	assert!((search.fragments[0].score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-6);
	assert_eq!(texts[2], "Fry cooks flip patties twice.");
	assert_eq!(texts[3], "Kelp shakes are blended to order.");
}

#[tokio::test]
async fn embedding_failure_uses_sparse_list_alone() {
	let mut harness = Harness::new();

	harness.embedding.fail = true;
	harness
		.sparse
		.points
		.insert("recipes".to_string(), vec![chunk("Fry cooks flip patties twice.", "flipping", 0, 8.0)]);

	let orchestrator = harness.build(config());
	let search = orchestrator
		.search
		.search_collection("patty", "recipes", &BTreeMap::new(), 20, None)
		.await;

	assert_eq!(search.mode, RetrievalMode::SparseOnly);
	assert_eq!(search.fragments.len(), 1);
}

#[tokio::test]
async fn collection_search_truncates_to_top_k() {
	let mut harness = Harness::new();
	let mut cfg = config();

	cfg.retrieval.hybrid_enabled = false;
	harness.vectors.points.insert(
		"recipes".to_string(),
		(0..30)
			.map(|idx| chunk(&format!("Recipe card {idx}."), "cards", idx, 1.0 - idx as f32 / 100.0))
			.collect(),
	);

	let orchestrator = harness.build(cfg);
	let search = orchestrator
		.search
		.search_collection("recipe cards", "recipes", &BTreeMap::new(), 5, None)
		.await;

	assert_eq!(search.mode, RetrievalMode::DenseOnly);
	assert_eq!(search.fragments.len(), 5);
	assert_eq!(search.fragments[0].text, "Recipe card 0.");
}

#[tokio::test]
async fn user_context_and_document_type_become_filters() {
	let harness = Harness::new();
	let conditions = harness.vectors.conditions.clone();
	let orchestrator = harness.build(config());
	let user_context = BTreeMap::from([
		("department".to_string(), "kitchen".to_string()),
		("location".to_string(), "Bikini Bottom".to_string()),
	]);

	orchestrator.search.search_collection("patty", "recipes", &user_context, 5, Some("recipe")).await;

	let seen = conditions.lock().expect("lock poisoned").clone();

	assert_eq!(
		seen,
		vec![vec![
			("metadata.department".to_string(), "kitchen".to_string()),
			("doc_type".to_string(), "recipe".to_string()),
		]]
	);
}

#[tokio::test]
async fn duplicates_across_collections_keep_higher_score() {
	let mut harness = Harness::new();

	harness.vectors.points = HashMap::from([
		("recipes".to_string(), vec![chunk("Shared safety notice.", "notice", 0, 0.3)]),
		("policies".to_string(), vec![chunk("Shared safety notice.", "notice", 0, 0.9)]),
	]);

	let mut cfg = config();

	cfg.retrieval.hybrid_enabled = false;

	let orchestrator = harness.build(cfg);
	let found = orchestrator
		.search
		.search_multiple_collections(
			"safety",
			&["recipes".to_string(), "policies".to_string()],
			&BTreeMap::new(),
			None,
		)
		.await;

	assert_eq!(found.fragments.len(), 1);
	assert_eq!(found.fragments[0].collection, "policies");
	assert!((found.fragments[0].score - 0.9).abs() < f32::EPSILON);
}

#[tokio::test]
async fn rerank_disabled_keeps_fused_order() {
	let mut cfg = config();

	cfg.rerank.enabled = false;

	let harness = Harness::new();
	let probes = harness.rerank.probes.clone();
	let orchestrator = harness.build(cfg);
	let expected: Vec<String> = orchestrator
		.search
		.search_multiple_collections("patty", &["recipes".to_string()], &BTreeMap::new(), None)
		.await
		.fragments
		.into_iter()
		.take(2)
		.map(|fragment| fragment.text)
		.collect();
	let request = AnswerRequest { top_k: Some(2), ..AnswerRequest::new("Krabby Patty recipe") };
	let response = orchestrator.answer(&request).await;

	assert!(!response.trace.reranking_enabled);
	assert_eq!(response.trace.top_k_used, 2);
	assert_eq!(fragment_texts(&response.sources), expected);
	assert_eq!(probes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reranking_reorders_and_replaces_scores() {
	let orchestrator = Harness::new().build(config());
	let request = AnswerRequest { top_k: Some(2), ..AnswerRequest::new("Krabby Patty recipe") };
	let response = orchestrator.answer(&request).await;
	let AnswerSources::Fragments(fragments) = &response.sources else {
		panic!("Expected fragment sources.");
	};

	assert!(response.trace.reranking_enabled);
	assert_eq!(fragments.len(), 2);
	assert_eq!(fragments[0].text, "Krabby Patty ingredients: bun, patty, pickles.");
	assert!((fragments[0].score - 11.0).abs() < f32::EPSILON);
}

#[tokio::test]
async fn reranker_initializes_once_under_concurrent_use() {
	let rerank = StubRerank::new();
	let probes = rerank.probes.clone();
	let reranker = Arc::new(Reranker::new(Arc::new(config()), Arc::new(rerank)));
	let candidates = vec![RetrievedFragment {
		text: "Krabby Patty ingredients.".to_string(),
		score: 0.5,
		collection: "recipes".to_string(),
		metadata: Map::new(),
		doc_id: None,
		chunk_index: None,
	}];
	let calls = (0..8).map(|_| {
		let reranker = reranker.clone();
		let candidates = candidates.clone();

		async move { reranker.rerank("patty", candidates, 5).await }
	});
	let outcomes = futures::future::join_all(calls).await;

	assert_eq!(probes.load(Ordering::SeqCst), 1);
	assert!(outcomes.iter().all(|outcome| outcome.applied));
}

#[tokio::test]
async fn failed_warm_up_disables_reranking_for_good() {
	let mut rerank = StubRerank::new();

	rerank.fail_probe = true;

	let probes = rerank.probes.clone();
	let reranker = Reranker::new(Arc::new(config()), Arc::new(rerank));
	let candidates: Vec<RetrievedFragment> = (0..4)
		.map(|idx| RetrievedFragment {
			text: format!("Chunk {idx}."),
			score: 1.0 - idx as f32 / 10.0,
			collection: "recipes".to_string(),
			metadata: Map::new(),
			doc_id: None,
			chunk_index: None,
		})
		.collect();
	let first = reranker.rerank("patty", candidates.clone(), 2).await;
	let second = reranker.rerank("patty", candidates.clone(), 2).await;

	assert!(!first.applied);
	assert!(!second.applied);
	assert!(reranker.is_disabled());
	assert_eq!(first.fragments, candidates[..2].to_vec());
	assert_eq!(probes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_rerank_call_disables_component() {
	let mut harness = Harness::new();

	harness.rerank.fail_rerank = true;

	let orchestrator = harness.build(config());
	let first = orchestrator.answer(&AnswerRequest::new("Krabby Patty recipe")).await;

	assert!(!first.trace.reranking_enabled);
	assert!(orchestrator.reranker.is_disabled());
	assert_eq!(first.trace.error, None);
}

#[tokio::test]
async fn summary_gate_hit_skips_chunk_search() {
	let mut harness = Harness::new();

	harness.summaries.points.insert(
		"recipes_summaries".to_string(),
		vec![summary_point("formula", 0.9), summary_point("ingredients", 0.5)],
	);
	harness.documents = StubDocuments::with(vec![
		document("formula", "The full secret formula handbook."),
		document("ingredients", "Complete ingredient list."),
	]);

	let vector_calls = harness.vectors.calls.clone();
	let answer_calls = harness.chat.answer_calls.clone();
	let orchestrator = harness.build(config());
	let request =
		AnswerRequest { summary_gating: Some(true), ..AnswerRequest::new("Krabby Patty formula") };
	let response = orchestrator.answer(&request).await;

	assert!(response.trace.summary_gating_attempted);
	assert!(response.trace.summary_gating_used);
	assert_eq!(vector_calls.load(Ordering::SeqCst), 0);
	assert_eq!(answer_calls.load(Ordering::SeqCst), 1);
	assert_eq!(
		fragment_texts(&response.sources),
		vec!["The full secret formula handbook.", "Complete ingredient list."]
	);
	assert_eq!(response.trace.chunks_used, 2);
	assert!(response.trace.parent_docs_used);

	let AnswerSources::Documents(documents) = &response.sources else {
		panic!("Expected document sources.");
	};

	assert_eq!(documents[0].collection, "recipes");
}

#[tokio::test]
async fn summary_gate_miss_falls_back_to_chunk_search() {
	let harness = Harness::new();
	let queried = harness.summaries.queried.clone();
	let vector_calls = harness.vectors.calls.clone();
	let orchestrator = harness.build(config());
	let request =
		AnswerRequest { summary_gating: Some(true), ..AnswerRequest::new("Krabby Patty formula") };
	let response = orchestrator.answer(&request).await;

	assert!(response.trace.summary_gating_attempted);
	assert!(!response.trace.summary_gating_used);
	assert_eq!(
		queried.lock().expect("lock poisoned").clone(),
		vec!["recipes_summaries".to_string()]
	);
	assert_eq!(vector_calls.load(Ordering::SeqCst), 1);
	assert!(matches!(response.sources, AnswerSources::Fragments(_)));
}

#[tokio::test]
async fn missing_summary_gate_goes_straight_to_search() {
	let orchestrator = Harness::new().build(config()).without_summary_gate();
	let request =
		AnswerRequest { summary_gating: Some(true), ..AnswerRequest::new("Krabby Patty formula") };
	let response = orchestrator.answer(&request).await;

	assert!(!response.trace.summary_gating_attempted);
	assert_eq!(response.trace.error, None);
}

#[tokio::test]
async fn parent_expansion_keeps_first_seen_order_and_cap() {
	let mut harness = Harness::new();
	let mut cfg = config();

	cfg.rerank.enabled = false;
	cfg.summary.max_parent_docs = 2;
	harness.vectors.points.insert(
		"recipes".to_string(),
		vec![
			chunk("Formula part one.", "formula", 0, 0.9),
			chunk("Ingredient list part one.", "ingredients", 0, 0.8),
			chunk("Formula part two.", "formula", 1, 0.7),
			chunk("Shake menu.", "shakes", 0, 0.6),
		],
	);
	harness.documents = StubDocuments::with(vec![
		document("formula", "Whole formula."),
		document("ingredients", "Whole ingredient list."),
		document("shakes", "Whole shake menu."),
	]);

	let orchestrator = harness.build(cfg);
	let request =
		AnswerRequest { parent_docs: Some(true), ..AnswerRequest::new("Krabby Patty recipe") };
	let response = orchestrator.answer(&request).await;

	assert!(response.trace.parent_docs_used);
	assert_eq!(fragment_texts(&response.sources), vec!["Whole formula.", "Whole ingredient list."]);
	assert_eq!(response.trace.chunks_used, 4);
}

#[tokio::test]
async fn unresolved_parents_keep_chunk_context() {
	let orchestrator = Harness::new().build(config());
	let request =
		AnswerRequest { parent_docs: Some(true), ..AnswerRequest::new("Krabby Patty recipe") };
	let response = orchestrator.answer(&request).await;

	assert!(!response.trace.parent_docs_used);
	assert!(matches!(response.sources, AnswerSources::Fragments(_)));
}

#[tokio::test]
async fn generation_failure_is_traced() {
	let mut harness = Harness::new();

	harness.chat.fail = true;

	let orchestrator = harness.build(config());
	let response = orchestrator.answer(&AnswerRequest::new("Krabby Patty recipe")).await;

	assert_eq!(response.answer, "I couldn't generate a response.");
	assert_eq!(response.trace.error, Some(TraceError::GenerationFailed));
}

#[tokio::test]
async fn empty_model_output_uses_empty_response_message() {
	let mut harness = Harness::new();

	harness.chat.answer = "  \n".to_string();

	let orchestrator = harness.build(config());
	let response = orchestrator.answer(&AnswerRequest::new("Krabby Patty recipe")).await;

	assert_eq!(response.answer, "I couldn't generate a response.");
	assert_eq!(response.trace.error, None);
}

#[tokio::test]
async fn streaming_delivers_fragments_in_order() {
	let mut harness = Harness::new();

	harness.chat.deltas = vec!["Two ".to_string(), "all-beef ".to_string(), "patties.".to_string()];

	let orchestrator = harness.build(config());
	let answer = orchestrator.answer_stream(&AnswerRequest::new("Krabby Patty recipe")).await;
	let parts: Vec<String> = answer.deltas.collect().await;

	assert_eq!(parts, vec!["Two ", "all-beef ", "patties."]);
	assert_eq!(answer.trace.error, None);
	assert_eq!(answer.trace.answer_length, None);
	assert!(!answer.sources.is_empty());
}

#[tokio::test]
async fn dropping_answer_stream_closes_upstream() {
	let mut harness = Harness::new();

	harness.chat.deltas = vec!["Two ".to_string(), "all-beef ".to_string()];
	harness.chat.hold_open = true;

	let upstream_dropped = harness.chat.upstream_dropped.clone();
	let orchestrator = harness.build(config());
	let mut answer = orchestrator.answer_stream(&AnswerRequest::new("Krabby Patty recipe")).await;
	let first = answer.deltas.next().await;

	assert_eq!(first.as_deref(), Some("Two "));
	assert!(!upstream_dropped.load(Ordering::SeqCst));

	drop(answer);

	assert!(upstream_dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failed_stream_start_yields_empty_message_once() {
	let mut harness = Harness::new();

	harness.chat.fail = true;

	let orchestrator = harness.build(config());
	let answer = orchestrator.answer_stream(&AnswerRequest::new("Krabby Patty recipe")).await;
	let parts: Vec<String> = answer.deltas.collect().await;

	assert_eq!(parts, vec!["I couldn't generate a response."]);
	assert_eq!(answer.trace.error, Some(TraceError::GenerationFailed));
}

#[tokio::test]
async fn streaming_no_results_yields_fallback_message() {
	let mut cfg = config();

	cfg.router.default_collections.clear();

	let harness = Harness::new();
	let answer_calls = harness.chat.answer_calls.clone();
	let orchestrator = harness.build(cfg);
	let answer = orchestrator.answer_stream(&AnswerRequest::new("Weather report")).await;
	let parts: Vec<String> = answer.deltas.collect().await;

	assert_eq!(parts, vec!["I couldn't find relevant information to answer your question."]);
	assert_eq!(answer.trace.error, Some(TraceError::NoResults));
	assert_eq!(answer_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn collection_stats_use_physical_names() {
	let mut cfg = config();

	if let Some(recipes) = cfg.collections.get_mut("recipes") {
		recipes.name = Some("kitchen_recipes".to_string());
	}

	let mut harness = Harness::new();

	harness.vectors.points.insert("kitchen_recipes".to_string(), recipe_chunks());

	let orchestrator = harness.build(cfg);
	let stats = orchestrator.search.collection_stats("recipes").await.expect("stats failed");
	let names = orchestrator.search.list_collections().await.expect("list failed");

	assert_eq!(stats.name, "kitchen_recipes");
	assert_eq!(stats.points_count, 3);
	assert_eq!(names, vec!["kitchen_recipes".to_string(), "recipes".to_string()]);
}

#[tokio::test]
async fn collection_stats_failure_surfaces_as_not_found() {
	let mut harness = Harness::new();

	harness.vectors.fail = true;

	let orchestrator = harness.build(config());
	let err = orchestrator.search.collection_stats("menus").await.expect_err("Expected an error.");

	assert!(matches!(
		err,
		lore_service::Error::NotFound { ref message } if message.contains("menus")
	));
}
