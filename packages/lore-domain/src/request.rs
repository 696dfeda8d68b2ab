use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
	context::ContextBundle,
	records::{ChatMessage, ParentDocument, RetrievedFragment},
	trace::AnswerTrace,
};

/// A question plus optional conversation, user context and per-request overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequest {
	pub query: String,
	#[serde(default)]
	pub history: Vec<ChatMessage>,
	#[serde(default)]
	pub user_context: BTreeMap<String, String>,
	/// Explicit selection bypasses routing.
	pub collections: Option<Vec<String>>,
	pub top_k: Option<u32>,
	pub thinking: Option<bool>,
	pub show_thinking: Option<bool>,
	pub rerank: Option<bool>,
	pub summary_gating: Option<bool>,
	pub parent_docs: Option<bool>,
}
impl AnswerRequest {
	pub fn new(query: impl Into<String>) -> Self {
		Self { query: query.into(), ..Default::default() }
	}
}

/// Material that was placed into the prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum AnswerSources {
	Fragments(Vec<RetrievedFragment>),
	Documents(Vec<ParentDocument>),
}
impl AnswerSources {
	pub fn len(&self) -> usize {
		match self {
			Self::Fragments(items) => items.len(),
			Self::Documents(items) => items.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn to_context(&self, display_keys: &[String]) -> ContextBundle {
		match self {
			Self::Fragments(items) => ContextBundle::from_fragments(items, display_keys),
			Self::Documents(items) => ContextBundle::from_documents(items, display_keys),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResponse {
	pub answer: String,
	pub sources: AnswerSources,
	pub trace: AnswerTrace,
}
