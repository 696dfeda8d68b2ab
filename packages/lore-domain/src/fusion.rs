//! Reciprocal Rank Fusion over dense and sparse result lists.

use std::collections::{HashMap, HashSet, hash_map::Entry};

use crate::records::RetrievedFragment;

pub const DEFAULT_RRF_K: u32 = 60;

/// Alignment key for the same fragment across retrieval modes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FragmentKey {
	Chunk { doc_id: String, chunk_index: u32 },
	Text(String),
}

pub fn fragment_key(fragment: &RetrievedFragment) -> FragmentKey {
	match (&fragment.doc_id, fragment.chunk_index) {
		(Some(doc_id), Some(chunk_index)) =>
			FragmentKey::Chunk { doc_id: doc_id.clone(), chunk_index },
		_ => FragmentKey::Text(fragment.text.clone()),
	}
}

/// Contribution of a 1-indexed rank.
pub fn rrf_term(k: u32, rank: usize) -> f32 {
	1.0 / (k as f32 + rank as f32)
}

/// Fuses ranked lists by summing `1 / (k + rank)` for every list a fragment appears in.
///
/// Ties keep dense order, and sparse-only fragments follow in sparse order. A key repeated
/// within one list only contributes its first rank.
pub fn reciprocal_rank_fusion(
	dense: Vec<RetrievedFragment>,
	sparse: Vec<RetrievedFragment>,
	k: u32,
) -> Vec<RetrievedFragment> {
	let mut fused: Vec<RetrievedFragment> = Vec::with_capacity(dense.len() + sparse.len());
	let mut positions: HashMap<FragmentKey, usize> = HashMap::new();

	for list in [dense, sparse] {
		let mut seen_in_list = HashSet::new();

		for (idx, fragment) in list.into_iter().enumerate() {
			let key = fragment_key(&fragment);

			if !seen_in_list.insert(key.clone()) {
				continue;
			}

			let term = rrf_term(k, idx + 1);

			match positions.entry(key) {
				Entry::Occupied(entry) => fused[*entry.get()].score += term,
				Entry::Vacant(entry) => {
					entry.insert(fused.len());
					fused.push(RetrievedFragment { score: term, ..fragment });
				},
			}
		}
	}

	fused.sort_by(|a, b| b.score.total_cmp(&a.score));

	fused
}
