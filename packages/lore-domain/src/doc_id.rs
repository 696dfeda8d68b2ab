//! Deterministic document identifiers derived from source paths.

use std::path::Path;

use uuid::Uuid;

/// Returns the path relative to `base_dir` with `/` separators, preserving case.
///
/// Paths outside `base_dir` are used as given.
pub fn normalized_path(path: &str, base_dir: Option<&str>) -> String {
	let relative = base_dir
		.and_then(|base| Path::new(path).strip_prefix(base).ok())
		.and_then(|rel| rel.to_str())
		.unwrap_or(path);

	relative.replace('\\', "/")
}

/// Returns a 32-character lowercase hex identifier for the document at `path`.
pub fn doc_id(path: &str, base_dir: Option<&str>) -> String {
	let uuid = doc_uuid(path, base_dir);

	uuid.simple().to_string()
}

/// The document identifier as a UUID, used as the point id in the document store.
pub fn doc_uuid(path: &str, base_dir: Option<&str>) -> Uuid {
	let key = normalized_path(path, base_dir).to_lowercase();
	let hash = blake3::hash(key.trim().as_bytes());
	let mut bytes = [0_u8; 16];

	bytes.copy_from_slice(&hash.as_bytes()[..16]);

	Uuid::from_bytes(bytes)
}

/// Parses a stored document identifier back into its point id.
pub fn point_id(doc_id: &str) -> Option<Uuid> {
	let trimmed = doc_id.trim();

	if trimmed.len() != 32 {
		return None;
	}

	Uuid::try_parse(trimmed).ok()
}
