use std::collections::HashMap;

use crate::records::RetrievedFragment;

pub const DEFAULT_DEDUP_PREFIX_CHARS: usize = 200;

/// The first `prefix_chars` characters of a fragment's text.
pub fn fingerprint(text: &str, prefix_chars: usize) -> &str {
	match text.char_indices().nth(prefix_chars) {
		Some((end, _)) => &text[..end],
		None => text,
	}
}

/// Drops fragments whose fingerprint repeats, keeping the higher-scoring one, then sorts by
/// score descending. Equal scores keep their first-seen order.
pub fn deduplicate(fragments: Vec<RetrievedFragment>, prefix_chars: usize) -> Vec<RetrievedFragment> {
	let mut kept: Vec<RetrievedFragment> = Vec::with_capacity(fragments.len());
	let mut positions: HashMap<String, usize> = HashMap::new();

	for fragment in fragments {
		let key = fingerprint(&fragment.text, prefix_chars).to_string();

		match positions.get(&key) {
			Some(&idx) =>
				if fragment.score > kept[idx].score {
					kept[idx] = fragment;
				},
			None => {
				positions.insert(key, kept.len());
				kept.push(fragment);
			},
		}
	}

	sort_by_score(&mut kept);

	kept
}

/// Stable sort by score, highest first.
pub fn sort_by_score(fragments: &mut [RetrievedFragment]) {
	fragments.sort_by(|a, b| b.score.total_cmp(&a.score));
}

#[cfg(test)]
mod tests {
	use serde_json::Map;

	use super::*;

	fn fragment(text: &str, score: f32, collection: &str) -> RetrievedFragment {
		RetrievedFragment {
			text: text.to_string(),
			score,
			collection: collection.to_string(),
			metadata: Map::new(),
			doc_id: None,
			chunk_index: None,
		}
	}

	#[test]
	fn shared_prefix_keeps_higher_score() {
		let prefix = "x".repeat(200);
		let low = fragment(&format!("{prefix} tail one"), 0.3, "recipes");
		let high = fragment(&format!("{prefix} tail two"), 0.9, "policies");
		let out = deduplicate(vec![low, high], DEFAULT_DEDUP_PREFIX_CHARS);

		assert_eq!(out.len(), 1);
		assert_eq!(out[0].score, 0.9);
		assert_eq!(out[0].collection, "policies");
	}

	#[test]
	fn distinct_prefixes_survive_sorted() {
		let out = deduplicate(
			vec![fragment("alpha", 0.2, "a"), fragment("beta", 0.8, "a"), fragment("gamma", 0.5, "b")],
			DEFAULT_DEDUP_PREFIX_CHARS,
		);
		let order: Vec<&str> = out.iter().map(|f| f.text.as_str()).collect();

		assert_eq!(order, vec!["beta", "gamma", "alpha"]);
	}

	#[test]
	fn equal_scores_keep_first_seen_order() {
		let out = deduplicate(
			vec![fragment("one", 0.5, "a"), fragment("two", 0.5, "b"), fragment("one", 0.5, "b")],
			DEFAULT_DEDUP_PREFIX_CHARS,
		);
		let order: Vec<(&str, &str)> =
			out.iter().map(|f| (f.text.as_str(), f.collection.as_str())).collect();

		assert_eq!(order, vec![("one", "a"), ("two", "b")]);
	}

	#[test]
	fn fingerprint_counts_characters_not_bytes() {
		assert_eq!(fingerprint("héllo", 2), "hé");
		assert_eq!(fingerprint("hi", 200), "hi");
	}
}
