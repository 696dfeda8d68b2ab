//! Renders retrieved fragments and documents into a labelled context block.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::records::{ParentDocument, RetrievedFragment};

/// Metadata keys tried in order for the `Source:` part of a label.
pub const SOURCE_KEYS: [&str; 4] = ["file_name", "resourceName", "source", "source_path"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextEntry {
	pub text: String,
	pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextBundle {
	pub entries: Vec<ContextEntry>,
}
impl ContextBundle {
	pub fn from_fragments(fragments: &[RetrievedFragment], display_keys: &[String]) -> Self {
		let entries = fragments
			.iter()
			.map(|fragment| ContextEntry {
				text: fragment.text.clone(),
				label: provenance_label(&fragment.collection, &fragment.metadata, display_keys),
			})
			.collect();

		Self { entries }
	}

	pub fn from_documents(documents: &[ParentDocument], display_keys: &[String]) -> Self {
		let entries = documents
			.iter()
			.map(|doc| {
				let mut metadata = doc.metadata.clone();

				if !doc.source_path.is_empty() {
					metadata
						.entry("source_path")
						.or_insert_with(|| Value::String(doc.source_path.clone()));
				}

				ContextEntry {
					text: doc.text.clone(),
					label: provenance_label(&doc.collection, &metadata, display_keys),
				}
			})
			.collect();

		Self { entries }
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Entries separated by blank lines, each prefixed by its label when one exists.
	pub fn render(&self) -> String {
		self.entries
			.iter()
			.map(|entry| {
				if entry.label.is_empty() {
					entry.text.clone()
				} else {
					format!("{} {}", entry.label, entry.text)
				}
			})
			.collect::<Vec<_>>()
			.join("\n\n")
	}
}

/// Builds `[Collection: c, Source: s, Key Title: v]`, or an empty string when nothing is known.
pub fn provenance_label(
	collection: &str,
	metadata: &Map<String, Value>,
	display_keys: &[String],
) -> String {
	let mut parts = Vec::new();

	if !collection.is_empty() {
		parts.push(format!("Collection: {collection}"));
	}
	if let Some(source) = SOURCE_KEYS.iter().find_map(|key| display_value(metadata.get(*key))) {
		parts.push(format!("Source: {source}"));
	}

	for key in display_keys {
		if let Some(value) = display_value(metadata.get(key)) {
			parts.push(format!("{}: {value}", title_case_key(key)));
		}
	}

	if parts.is_empty() { String::new() } else { format!("[{}]", parts.join(", ")) }
}

/// `job_title` becomes `Job Title`.
pub fn title_case_key(key: &str) -> String {
	let mut out = String::with_capacity(key.len());
	let mut at_word_start = true;

	for ch in key.replace('_', " ").chars() {
		if ch.is_alphabetic() {
			if at_word_start {
				out.extend(ch.to_uppercase());
			} else {
				out.extend(ch.to_lowercase());
			}

			at_word_start = false;
		} else {
			out.push(ch);

			at_word_start = true;
		}
	}

	out
}

fn display_value(value: Option<&Value>) -> Option<String> {
	match value? {
		Value::Null | Value::Bool(false) => None,
		Value::String(text) if text.trim().is_empty() => None,
		Value::String(text) => Some(text.clone()),
		Value::Array(items) if items.is_empty() => None,
		other => Some(other.to_string()),
	}
}
