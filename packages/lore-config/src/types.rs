use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	/// Keyed by the logical collection identifier used in routing and requests.
	#[serde(default)]
	pub collections: BTreeMap<String, Collection>,
	#[serde(default)]
	pub router: Router,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub rerank: Rerank,
	#[serde(default)]
	pub summary: Summary,
	#[serde(default)]
	pub generation: Generation,
	#[serde(default)]
	pub domain: Domain,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub qdrant: Qdrant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub vector_dim: u32,
	#[serde(default = "default_qdrant_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default = "default_summary_suffix")]
	pub summary_suffix: String,
	#[serde(default = "default_docstore_collection")]
	pub docstore_collection: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub rerank: ProviderConfig,
	pub llm: LlmProviderConfig,
	/// Optional. When absent, routing uses the keyword strategy.
	pub router: Option<LlmProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	#[serde(default)]
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
	/// Optional. Prepended to query texts, e.g. "search_query: ".
	pub query_prefix: Option<String>,
	/// Optional. Prepended to document texts, e.g. "search_document: ".
	pub document_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	#[serde(default)]
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	#[serde(default)]
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Collection {
	/// Physical store collection. Defaults to the collection identifier.
	pub name: Option<String>,
	pub description: String,
	pub keywords: Vec<String>,
}
impl Collection {
	pub fn store_name<'a>(&'a self, id: &'a str) -> &'a str {
		self.name.as_deref().filter(|name| !name.trim().is_empty()).unwrap_or(id)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterStrategy {
	Model,
	Keyword,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Router {
	pub strategy: RouterStrategy,
	pub default_collections: Vec<String>,
	pub default_tokens: u32,
	pub min_tokens: u32,
	pub max_tokens: u32,
	pub last_n_messages: usize,
	pub max_output_tokens: u32,
	pub multi_collection_factor: f64,
	pub scheduling_factor: f64,
	pub scheduling_keywords: Vec<String>,
	/// Optional. Overrides the built-in routing prompt.
	pub prompt_template: Option<String>,
}
impl Default for Router {
	fn default() -> Self {
		Self {
			strategy: RouterStrategy::Model,
			default_collections: Vec::new(),
			default_tokens: 600,
			min_tokens: 150,
			max_tokens: 1_250,
			last_n_messages: 3,
			max_output_tokens: 500,
			multi_collection_factor: 1.3,
			scheduling_factor: 1.6,
			scheduling_keywords: vec!["plan".to_string(), "schedule".to_string()],
			prompt_template: None,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub top_k: u32,
	pub base_chunks_per_collection: u32,
	pub priority_boost: u32,
	pub collection_priority: Vec<String>,
	pub hybrid_enabled: bool,
	pub rrf_k: u32,
	pub dedup_prefix_chars: usize,
	pub metadata_display_keys: Vec<String>,
	/// User-context key to payload key, e.g. `department = "metadata.department"`.
	pub filter_mappings: BTreeMap<String, String>,
	pub document_type_field: String,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			top_k: 20,
			base_chunks_per_collection: 8,
			priority_boost: 4,
			collection_priority: Vec::new(),
			hybrid_enabled: true,
			rrf_k: 60,
			dedup_prefix_chars: 200,
			metadata_display_keys: Vec::new(),
			filter_mappings: BTreeMap::new(),
			document_type_field: "doc_type".to_string(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Rerank {
	pub enabled: bool,
}
impl Default for Rerank {
	fn default() -> Self {
		Self { enabled: true }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Summary {
	pub enable_summary_gating: bool,
	pub summary_top_n: usize,
	pub return_parent_docs: bool,
	pub max_parent_docs: usize,
}
impl Default for Summary {
	fn default() -> Self {
		Self {
			enable_summary_gating: false,
			summary_top_n: 5,
			return_parent_docs: false,
			max_parent_docs: 5,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Generation {
	/// Supports `{role}`, `{department}` and `{contact_email}` placeholders.
	pub system_prompt: String,
	/// Token budget used when the caller selects collections explicitly.
	pub max_tokens: u32,
	pub enable_thinking: bool,
	pub show_thinking: bool,
	pub no_results_message: String,
	pub empty_response_message: String,
}
impl Default for Generation {
	fn default() -> Self {
		Self {
			system_prompt: "You are a helpful {role} for {department}. Answer using only the \
provided context. If the context does not contain the answer, say so and suggest contacting \
{contact_email}."
				.to_string(),
			max_tokens: 1_024,
			enable_thinking: true,
			show_thinking: false,
			no_results_message: "I couldn't find relevant information to answer your question."
				.to_string(),
			empty_response_message: "I couldn't generate a response.".to_string(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Domain {
	pub role: String,
	pub department: String,
	pub contact_email: String,
	pub router_context: String,
}
impl Default for Domain {
	fn default() -> Self {
		Self {
			role: "assistant".to_string(),
			department: "organization".to_string(),
			contact_email: "support".to_string(),
			router_context: "a chatbot".to_string(),
		}
	}
}

fn default_qdrant_timeout_ms() -> u64 {
	10_000
}

fn default_summary_suffix() -> String {
	"_summaries".to_string()
}

fn default_docstore_collection() -> String {
	"docstore".to_string()
}
