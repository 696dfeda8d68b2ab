pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures that reach the caller. Provider failures degrade inside the pipeline instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Qdrant error: {message}")]
	Qdrant { message: String },
}
impl From<lore_storage::Error> for Error {
	fn from(err: lore_storage::Error) -> Self {
		match err {
			lore_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			lore_storage::Error::NotFound(message) => Self::NotFound { message },
			lore_storage::Error::Qdrant(inner) => Self::Qdrant { message: inner.to_string() },
		}
	}
}
