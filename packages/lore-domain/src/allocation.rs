use std::collections::BTreeMap;

/// Per-collection result budget: `base`, plus `boost` for prioritized collections.
pub fn chunk_allocation(
	collections: &[String],
	base: u32,
	boost: u32,
	priority: &[String],
) -> BTreeMap<String, u32> {
	collections
		.iter()
		.map(|id| {
			let budget = if priority.contains(id) { base + boost } else { base };

			(id.clone(), budget)
		})
		.collect()
}

/// Clamps a token allocation into `[min, max]`.
pub fn clamp_tokens(value: i64, min: u32, max: u32) -> u32 {
	value.max(i64::from(min)).min(i64::from(max)).max(0) as u32
}
