//! Collection routing: keyword strategy, router prompt and defensive response parsing.

use std::{collections::BTreeMap, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{allocation, context, records::ChatMessage};

pub const DEFAULT_ROUTER_PROMPT: &str = r#"You are a routing system for {router_context}.

Analyze the query and determine:
  1. Which knowledge collections are needed to answer it (select one or more)
  2. How many tokens the response should use (between {min_tokens} and {max_tokens})

Available Collections:
{collections_desc}

User Context:
{context}

Recent Conversation:
{conversation_context}

Current Query: "{query}"

Token Allocation Guidelines:
  - Simple lookups: {min_tokens}-300 tokens
  - Detailed information: 300-500 tokens
  - Multiple topics: 500-800 tokens
  - Complex requests: 800-{max_tokens} tokens

Respond ONLY with valid JSON in this exact format:
{{"collections": ["collection1", "collection2"], "token_allocation": 500, "reasoning": "brief explanation"}}"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
	pub collections: Vec<String>,
	pub token_allocation: u32,
	pub reasoning: String,
	/// Set when the decision is a default substituted for an unusable router response.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub fallback: Option<RoutingFallback>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingFallback {
	EmptyResponse,
	MalformedJson,
	NoJsonObject,
	ModelUnavailable,
}
impl RoutingFallback {
	pub fn reason(self) -> &'static str {
		match self {
			Self::EmptyResponse => "Empty response from router model",
			Self::MalformedJson => "Failed to parse router response",
			Self::NoJsonObject => "No valid JSON found in response",
			Self::ModelUnavailable => "Router model unavailable",
		}
	}
}

#[derive(Debug, Deserialize)]
struct RawDecision {
	collections: Option<Value>,
	token_allocation: Option<Value>,
	reasoning: Option<Value>,
}

/// The configured default collections and token allocation.
pub fn default_decision(cfg: &lore_config::Config, fallback: RoutingFallback) -> RoutingDecision {
	RoutingDecision {
		collections: cfg.router.default_collections.clone(),
		token_allocation: cfg.router.default_tokens,
		reasoning: fallback.reason().to_string(),
		fallback: Some(fallback),
	}
}

/// Routes by scanning the lowercased query for configured collection keywords.
pub fn keyword_route(query: &str, cfg: &lore_config::Config) -> RoutingDecision {
	let query_lower = query.to_lowercase();
	let mut collections: Vec<String> = cfg
		.collections
		.iter()
		.filter(|(_, collection)| {
			collection.keywords.iter().any(|keyword| query_lower.contains(keyword.as_str()))
		})
		.map(|(id, _)| id.clone())
		.collect();

	if collections.is_empty() {
		collections = cfg.router.default_collections.clone();
	}

	let router = &cfg.router;
	let base = f64::from(router.default_tokens);
	let scaled = if collections.len() > 2 {
		base * router.multi_collection_factor
	} else if router.scheduling_keywords.iter().any(|keyword| query_lower.contains(keyword.as_str()))
	{
		base * router.scheduling_factor
	} else {
		base
	};
	let token_allocation = allocation::clamp_tokens(scaled as i64, router.min_tokens, router.max_tokens);
	let reasoning = format!("Keyword-based routing: {}", collections.join(", "));

	RoutingDecision { collections, token_allocation, reasoning, fallback: None }
}

/// Renders the router prompt from the configured (or built-in) template.
pub fn router_prompt(
	cfg: &lore_config::Config,
	query: &str,
	history: &[ChatMessage],
	user_context: &BTreeMap<String, String>,
) -> String {
	let collections_desc = cfg
		.collections
		.iter()
		.map(|(id, collection)| format!("- {id}: {}", collection.description))
		.collect::<Vec<_>>()
		.join("\n");
	let context_lines = user_context
		.iter()
		.filter(|(_, value)| !value.trim().is_empty())
		.map(|(key, value)| format!("{}: {value}", context::title_case_key(key)))
		.collect::<Vec<_>>();
	let context_text = if context_lines.is_empty() {
		"No user context provided".to_string()
	} else {
		context_lines.join("\n")
	};
	let skip = history.len().saturating_sub(cfg.router.last_n_messages);
	let conversation = history[skip..]
		.iter()
		.map(|msg| format!("{}: {}\n", capitalize(&msg.role), msg.content))
		.collect::<String>();
	let conversation_context =
		if conversation.is_empty() { "No previous conversation".to_string() } else { conversation };
	let template = cfg.router.prompt_template.as_deref().unwrap_or(DEFAULT_ROUTER_PROMPT);
	let min_tokens = cfg.router.min_tokens.to_string();
	let max_tokens = cfg.router.max_tokens.to_string();

	fill_template(
		template,
		&[
			("router_context", cfg.domain.router_context.as_str()),
			("min_tokens", min_tokens.as_str()),
			("max_tokens", max_tokens.as_str()),
			("collections_desc", collections_desc.as_str()),
			("context", context_text.as_str()),
			("conversation_context", conversation_context.as_str()),
			("query", query),
		],
	)
}

/// Parses a router model response, substituting defaults for anything unusable.
pub fn parse_routing_response(raw: &str, cfg: &lore_config::Config) -> RoutingDecision {
	let cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");

	if cleaned.is_empty() {
		return default_decision(cfg, RoutingFallback::EmptyResponse);
	}

	let parsed = match serde_json::from_str::<RawDecision>(&cleaned) {
		Ok(parsed) => parsed,
		Err(_) => match extract_json_object(&cleaned) {
			Some(candidate) => match serde_json::from_str::<RawDecision>(candidate) {
				Ok(parsed) => parsed,
				Err(_) => return default_decision(cfg, RoutingFallback::MalformedJson),
			},
			None => return default_decision(cfg, RoutingFallback::NoJsonObject),
		},
	};
	let requested: Vec<String> = match parsed.collections {
		Some(Value::Array(items)) =>
			items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
		Some(Value::String(single)) => vec![single],
		_ => cfg.router.default_collections.clone(),
	};
	let mut collections: Vec<String> = Vec::with_capacity(requested.len());

	for id in requested {
		if cfg.collections.contains_key(&id) && !collections.contains(&id) {
			collections.push(id);
		}
	}

	if collections.is_empty() {
		collections = cfg.router.default_collections.clone();
	}

	let requested_tokens = parsed
		.token_allocation
		.as_ref()
		.and_then(|value| {
			value
				.as_i64()
				.or_else(|| value.as_f64().map(|tokens| tokens as i64))
				.or_else(|| value.as_str().and_then(|tokens| tokens.trim().parse().ok()))
		})
		.unwrap_or(i64::from(cfg.router.default_tokens));
	let token_allocation =
		allocation::clamp_tokens(requested_tokens, cfg.router.min_tokens, cfg.router.max_tokens);
	let reasoning = parsed
		.reasoning
		.as_ref()
		.and_then(Value::as_str)
		.filter(|reasoning| !reasoning.trim().is_empty())
		.unwrap_or("Model analysis")
		.to_string();

	RoutingDecision { collections, token_allocation, reasoning, fallback: None }
}

/// Finds the first brace-delimited object, allowing one level of nesting.
pub fn extract_json_object(text: &str) -> Option<&str> {
	static OBJECT: OnceLock<Option<Regex>> = OnceLock::new();

	let re = OBJECT.get_or_init(|| Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").ok()).as_ref()?;

	re.find(text).map(|m| m.as_str())
}

/// Substitutes `{name}` placeholders. `{{` and `}}` render as literal braces.
pub fn fill_template(template: &str, vars: &[(&str, &str)]) -> String {
	let mut out = String::with_capacity(template.len());
	let mut rest = template;

	while let Some(idx) = rest.find(['{', '}']) {
		out.push_str(&rest[..idx]);

		let tail = &rest[idx..];

		if tail.starts_with("{{") || tail.starts_with("}}") {
			out.push_str(&tail[..1]);
			rest = &tail[2..];

			continue;
		}
		if tail.starts_with('{')
			&& let Some(end) = tail.find('}')
			&& let Some((_, value)) = vars.iter().find(|(name, _)| *name == &tail[1..end])
		{
			out.push_str(value);
			rest = &tail[end + 1..];

			continue;
		}

		out.push_str(&tail[..1]);
		rest = &tail[1..];
	}

	out.push_str(rest);

	out
}

fn capitalize(word: &str) -> String {
	let mut chars = word.chars();

	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
		None => String::new(),
	}
}
