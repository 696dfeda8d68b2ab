use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceError {
	NoResults,
	GenerationFailed,
}

/// Per-query record of what the pipeline did. Every field is populated on every path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerTrace {
	pub query: String,
	pub collections_searched: Vec<String>,
	pub routing_used: bool,
	pub routing_reasoning: Option<String>,
	pub token_allocation: u32,
	pub top_k_used: u32,
	pub total_results: usize,
	pub chunks_used: usize,
	pub reranking_enabled: bool,
	pub hybrid_enabled: bool,
	/// Collections whose sparse retrieval failed and fell back to dense results.
	pub sparse_fallback: Vec<String>,
	pub thinking_enabled: bool,
	pub summary_gating_attempted: bool,
	pub summary_gating_used: bool,
	pub parent_docs_used: bool,
	pub prompt_length: usize,
	/// Buffered mode only.
	pub answer_length: Option<usize>,
	pub error: Option<TraceError>,
}
impl AnswerTrace {
	pub fn new(query: &str) -> Self {
		Self {
			query: query.to_string(),
			collections_searched: Vec::new(),
			routing_used: false,
			routing_reasoning: None,
			token_allocation: 0,
			top_k_used: 0,
			total_results: 0,
			chunks_used: 0,
			reranking_enabled: false,
			hybrid_enabled: false,
			sparse_fallback: Vec::new(),
			thinking_enabled: false,
			summary_gating_attempted: false,
			summary_gating_used: false,
			parent_docs_used: false,
			prompt_length: 0,
			answer_length: None,
			error: None,
		}
	}
}
