use std::{collections::BTreeMap, sync::Arc};

use lore_config::{Config, RouterStrategy};
use lore_domain::{
	records::ChatMessage,
	routing::{self, RoutingDecision, RoutingFallback},
};
use lore_providers::chat::ChatOptions;

use crate::ChatProvider;

/// Chooses collections and a token allocation for a query. Never fails.
#[derive(Clone)]
pub struct QueryRouter {
	cfg: Arc<Config>,
	chat: Arc<dyn ChatProvider>,
}
impl QueryRouter {
	pub fn new(cfg: Arc<Config>, chat: Arc<dyn ChatProvider>) -> Self {
		Self { cfg, chat }
	}

	/// Whether routing goes through the router model rather than keywords.
	pub fn uses_model(&self) -> bool {
		self.cfg.router.strategy == RouterStrategy::Model && self.cfg.providers.router.is_some()
	}

	pub async fn route(
		&self,
		query: &str,
		history: &[ChatMessage],
		user_context: &BTreeMap<String, String>,
	) -> RoutingDecision {
		let Some(router_cfg) = self.cfg.providers.router.as_ref().filter(|_| self.uses_model())
		else {
			let decision = routing::keyword_route(query, &self.cfg);

			tracing::debug!(collections = ?decision.collections, "Keyword routing.");

			return decision;
		};
		let prompt = routing::router_prompt(&self.cfg, query, history, user_context);
		let messages = [ChatMessage::user(prompt)];
		let options = ChatOptions {
			temperature: router_cfg.temperature,
			max_tokens: self.cfg.router.max_output_tokens,
			json: true,
		};
		let decision = match self.chat.chat(router_cfg, &messages, options).await {
			Ok(raw) => routing::parse_routing_response(&raw, &self.cfg),
			Err(err) => {
				tracing::warn!(error = %err, "Router model call failed. Using default collections.");

				return routing::default_decision(&self.cfg, RoutingFallback::ModelUnavailable);
			},
		};

		if let Some(fallback) = decision.fallback {
			tracing::warn!(reason = fallback.reason(), "Router response unusable. Using defaults.");
		} else {
			tracing::debug!(
				collections = ?decision.collections,
				token_allocation = decision.token_allocation,
				"Model routing."
			);
		}

		decision
	}
}
