use std::{pin::Pin, sync::Arc};

use futures::{Stream, StreamExt, stream};

use lore_config::Config;
use lore_domain::{
	prompt,
	records::{ChatMessage, ParentDocument, RetrievedFragment},
	request::{AnswerRequest, AnswerResponse, AnswerSources},
	routing::RoutingDecision,
	trace::{AnswerTrace, TraceError},
};
use lore_providers::chat::ChatOptions;
use lore_storage::qdrant::QdrantStore;

use crate::{
	ChatProvider, DocumentStore, Providers, QueryRouter, Reranker, SearchEngine, Stores,
	SummaryGatedRetriever, summary,
};

pub type TextStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// An incremental answer. The trace is final except for `answer_length`, which stays unset.
pub struct AnswerStream {
	pub trace: AnswerTrace,
	pub sources: AnswerSources,
	/// Answer text in delivery order. Dropping it closes the upstream response.
	pub deltas: TextStream,
}

enum Prepared {
	NoResults,
	Generate { messages: Vec<ChatMessage>, options: ChatOptions, sources: AnswerSources },
}

/// Runs a query through routing, retrieval, reranking and generation.
pub struct AnswerOrchestrator {
	pub cfg: Arc<Config>,
	pub router: QueryRouter,
	pub search: SearchEngine,
	pub reranker: Arc<Reranker>,
	pub summary: Option<SummaryGatedRetriever>,
	documents: Arc<dyn DocumentStore>,
	chat: Arc<dyn ChatProvider>,
}
impl AnswerOrchestrator {
	pub fn new(cfg: Config, store: Arc<QdrantStore>) -> Self {
		Self::with_providers(cfg, Stores::qdrant(store), Providers::default())
	}

	pub fn with_providers(cfg: Config, stores: Stores, providers: Providers) -> Self {
		let cfg = Arc::new(cfg);

		Self {
			router: QueryRouter::new(cfg.clone(), providers.chat.clone()),
			search: SearchEngine::new(cfg.clone(), &providers, &stores),
			reranker: Arc::new(Reranker::new(cfg.clone(), providers.rerank.clone())),
			summary: Some(SummaryGatedRetriever::new(cfg.clone(), &providers, &stores)),
			documents: stores.documents.clone(),
			chat: providers.chat.clone(),
			cfg,
		}
	}

	/// Drops the summary gate, so gating requests go straight to chunk search.
	pub fn without_summary_gate(mut self) -> Self {
		self.summary = None;

		self
	}

	/// Answers with the full text in one piece.
	pub async fn answer(&self, request: &AnswerRequest) -> AnswerResponse {
		let (mut trace, prepared) = self.prepare(request).await;
		let generation = &self.cfg.generation;
		let (answer, sources) = match prepared {
			Prepared::NoResults =>
				(generation.no_results_message.clone(), AnswerSources::Fragments(Vec::new())),
			Prepared::Generate { messages, options, sources } => {
				let answer = match self.chat.chat(&self.cfg.providers.llm, &messages, options).await {
					Ok(text) if text.trim().is_empty() => generation.empty_response_message.clone(),
					Ok(text) => text,
					Err(err) => {
						tracing::warn!(error = %err, "Generation failed.");

						trace.error = Some(TraceError::GenerationFailed);

						generation.empty_response_message.clone()
					},
				};

				(answer, sources)
			},
		};

		trace.answer_length = Some(answer.chars().count());

		tracing::info!(
			collections = ?trace.collections_searched,
			chunks_used = trace.chunks_used,
			error = ?trace.error,
			"Answer completed."
		);

		AnswerResponse { answer, sources, trace }
	}

	/// Answers incrementally. A failed stream start yields the empty-response message once.
	pub async fn answer_stream(&self, request: &AnswerRequest) -> AnswerStream {
		let (mut trace, prepared) = self.prepare(request).await;
		let generation = &self.cfg.generation;

		match prepared {
			Prepared::NoResults => AnswerStream {
				trace,
				sources: AnswerSources::Fragments(Vec::new()),
				deltas: Box::pin(stream::once(futures::future::ready(
					generation.no_results_message.clone(),
				))),
			},
			Prepared::Generate { messages, options, sources } => {
				let deltas: TextStream =
					match self.chat.chat_stream(&self.cfg.providers.llm, &messages, options).await {
						Ok(mut upstream) => Box::pin(async_stream::stream! {
							while let Some(item) = upstream.next().await {
								match item {
									Ok(text) => {
										yield text;
									},
									Err(err) => {
										tracing::warn!(error = %err, "Generation stream interrupted.");

										break;
									},
								}
							}
						}),
						Err(err) => {
							tracing::warn!(error = %err, "Generation stream failed to start.");

							trace.error = Some(TraceError::GenerationFailed);

							Box::pin(stream::once(futures::future::ready(
								generation.empty_response_message.clone(),
							)))
						},
					};

				AnswerStream { trace, sources, deltas }
			},
		}
	}

	async fn prepare(&self, request: &AnswerRequest) -> (AnswerTrace, Prepared) {
		let cfg = &self.cfg;
		let query = request.query.as_str();
		let mut trace = AnswerTrace::new(query);
		let thinking = request.thinking.unwrap_or(cfg.generation.enable_thinking);
		let show_thinking = request.show_thinking.unwrap_or(cfg.generation.show_thinking);
		let top_k = request.top_k.unwrap_or(cfg.retrieval.top_k);

		trace.thinking_enabled = thinking;
		trace.top_k_used = top_k;
		trace.hybrid_enabled = cfg.retrieval.hybrid_enabled;

		let decision = self.select_collections(request).await;

		trace.routing_used = request.collections.is_none();
		trace.routing_reasoning = trace.routing_used.then(|| decision.reasoning.clone());
		trace.collections_searched = decision.collections.clone();
		trace.token_allocation = decision.token_allocation;

		let sources = match self.gated_documents(request, &decision.collections, &mut trace).await {
			Some(documents) => AnswerSources::Documents(documents),
			None => {
				let found = self
					.search
					.search_multiple_collections(
						query,
						&decision.collections,
						&request.user_context,
						None,
					)
					.await;

				trace.sparse_fallback = found.sparse_fallback;
				trace.total_results = found.fragments.len();

				if found.fragments.is_empty() {
					tracing::info!(collections = ?decision.collections, "No results.");

					trace.error = Some(TraceError::NoResults);

					return (trace, Prepared::NoResults);
				}

				let ranked = self.rank(request, found.fragments, top_k as usize, &mut trace).await;

				trace.chunks_used = ranked.len();

				match self.expand_parents(request, &ranked).await {
					Some(documents) => {
						trace.parent_docs_used = true;

						AnswerSources::Documents(documents)
					},
					None => AnswerSources::Fragments(ranked),
				}
			},
		};
		let context = sources.to_context(&cfg.retrieval.metadata_display_keys).render();
		let user_prompt = prompt::build_prompt(&context, query, thinking, show_thinking);

		trace.prompt_length = user_prompt.chars().count();

		let messages =
			prompt::generation_messages(prompt::system_prompt(cfg), &request.history, user_prompt);
		let options = ChatOptions {
			temperature: cfg.providers.llm.temperature,
			max_tokens: decision.token_allocation,
			json: false,
		};

		(trace, Prepared::Generate { messages, options, sources })
	}

	/// Explicit collections bypass the router and use the generation token budget.
	async fn select_collections(&self, request: &AnswerRequest) -> RoutingDecision {
		match &request.collections {
			Some(explicit) => {
				let mut collections: Vec<String> = Vec::with_capacity(explicit.len());

				for id in explicit.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
					if !collections.iter().any(|seen| seen == id) {
						collections.push(id.to_string());
					}
				}

				RoutingDecision {
					reasoning: "Explicit collection selection".to_string(),
					token_allocation: self.cfg.generation.max_tokens,
					collections,
					fallback: None,
				}
			},
			None =>
				self.router.route(&request.query, &request.history, &request.user_context).await,
		}
	}

	async fn gated_documents(
		&self,
		request: &AnswerRequest,
		collections: &[String],
		trace: &mut AnswerTrace,
	) -> Option<Vec<ParentDocument>> {
		let enabled = request.summary_gating.unwrap_or(self.cfg.summary.enable_summary_gating);
		let gate = self.summary.as_ref().filter(|_| enabled)?;

		trace.summary_gating_attempted = true;

		let documents = gate
			.get_documents_by_summaries(&request.query, collections, self.cfg.summary.summary_top_n)
			.await;

		if documents.is_empty() {
			tracing::debug!("Summary gate found no documents. Falling back to chunk search.");

			return None;
		}

		trace.summary_gating_used = true;
		trace.parent_docs_used = true;
		trace.total_results = documents.len();
		trace.chunks_used = documents.len();

		Some(documents)
	}

	async fn rank(
		&self,
		request: &AnswerRequest,
		mut fragments: Vec<RetrievedFragment>,
		top_k: usize,
		trace: &mut AnswerTrace,
	) -> Vec<RetrievedFragment> {
		if !request.rerank.unwrap_or(self.cfg.rerank.enabled) {
			fragments.truncate(top_k);

			return fragments;
		}

		let outcome = self.reranker.rerank(&request.query, fragments, top_k).await;

		trace.reranking_enabled = outcome.applied;

		outcome.fragments
	}

	/// Full documents for the first distinct identifiers in ranked order, capped at
	/// `max_parent_docs`. `None` keeps the chunk context.
	async fn expand_parents(
		&self,
		request: &AnswerRequest,
		fragments: &[RetrievedFragment],
	) -> Option<Vec<ParentDocument>> {
		if !request.parent_docs.unwrap_or(self.cfg.summary.return_parent_docs) {
			return None;
		}

		let mut doc_ids: Vec<String> = Vec::new();

		for doc_id in fragments.iter().filter_map(|fragment| fragment.doc_id.as_ref()) {
			if doc_ids.len() == self.cfg.summary.max_parent_docs {
				break;
			}
			if !doc_ids.contains(doc_id) {
				doc_ids.push(doc_id.clone());
			}
		}

		if doc_ids.is_empty() {
			return None;
		}

		let documents = summary::resolve_documents(self.documents.as_ref(), &doc_ids).await;

		if documents.is_empty() {
			tracing::debug!("No parent documents resolved. Keeping chunk context.");

			return None;
		}

		Some(documents)
	}
}
