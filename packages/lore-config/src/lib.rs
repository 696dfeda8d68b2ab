mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Collection, Config, Domain, EmbeddingProviderConfig, Generation, LlmProviderConfig,
	ProviderConfig, Providers, Qdrant, Rerank, Retrieval, Router, RouterStrategy, Service, Storage,
	Summary,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.qdrant.url.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.url must be non-empty.".to_string(),
		});
	}
	if cfg.storage.qdrant.docstore_collection.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.docstore_collection must be non-empty.".to_string(),
		});
	}
	if cfg.storage.qdrant.summary_suffix.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.summary_suffix must be non-empty.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.qdrant.vector_dim."
				.to_string(),
		});
	}

	let router = &cfg.router;

	if router.min_tokens == 0 {
		return Err(Error::Validation {
			message: "router.min_tokens must be greater than zero.".to_string(),
		});
	}
	if router.min_tokens > router.default_tokens || router.default_tokens > router.max_tokens {
		return Err(Error::Validation {
			message: "router token bounds must satisfy min_tokens <= default_tokens <= max_tokens."
				.to_string(),
		});
	}

	for (label, factor) in [
		("router.multi_collection_factor", router.multi_collection_factor),
		("router.scheduling_factor", router.scheduling_factor),
	] {
		if !factor.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
		if factor < 0.0 {
			return Err(Error::Validation { message: format!("{label} must be zero or greater.") });
		}
	}

	if router.multi_collection_factor == 0.0 || router.scheduling_factor == 0.0 {
		return Err(Error::Validation {
			message: "router scaling factors must be greater than zero.".to_string(),
		});
	}
	if router.max_output_tokens == 0 {
		return Err(Error::Validation {
			message: "router.max_output_tokens must be greater than zero.".to_string(),
		});
	}

	for id in &router.default_collections {
		if !cfg.collections.contains_key(id) {
			return Err(Error::Validation {
				message: format!("router.default_collections references unknown collection {id}."),
			});
		}
	}

	let retrieval = &cfg.retrieval;

	for (label, value) in [
		("retrieval.top_k", retrieval.top_k),
		("retrieval.base_chunks_per_collection", retrieval.base_chunks_per_collection),
		("retrieval.rrf_k", retrieval.rrf_k),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if retrieval.dedup_prefix_chars == 0 {
		return Err(Error::Validation {
			message: "retrieval.dedup_prefix_chars must be greater than zero.".to_string(),
		});
	}
	if retrieval.document_type_field.trim().is_empty() {
		return Err(Error::Validation {
			message: "retrieval.document_type_field must be non-empty.".to_string(),
		});
	}

	for id in &retrieval.collection_priority {
		if !cfg.collections.contains_key(id) {
			return Err(Error::Validation {
				message: format!("retrieval.collection_priority references unknown collection {id}."),
			});
		}
	}
	for (context_key, payload_key) in &retrieval.filter_mappings {
		if context_key.trim().is_empty() || payload_key.trim().is_empty() {
			return Err(Error::Validation {
				message: "retrieval.filter_mappings keys and values must be non-empty.".to_string(),
			});
		}
	}

	if cfg.summary.summary_top_n == 0 {
		return Err(Error::Validation {
			message: "summary.summary_top_n must be greater than zero.".to_string(),
		});
	}
	if cfg.summary.max_parent_docs == 0 {
		return Err(Error::Validation {
			message: "summary.max_parent_docs must be greater than zero.".to_string(),
		});
	}
	if cfg.generation.max_tokens == 0 {
		return Err(Error::Validation {
			message: "generation.max_tokens must be greater than zero.".to_string(),
		});
	}
	if cfg.generation.system_prompt.trim().is_empty() {
		return Err(Error::Validation {
			message: "generation.system_prompt must be non-empty.".to_string(),
		});
	}

	for (label, temperature) in [
		("providers.llm.temperature", Some(cfg.providers.llm.temperature)),
		("providers.router.temperature", cfg.providers.router.as_ref().map(|r| r.temperature)),
	] {
		if let Some(temperature) = temperature
			&& (!temperature.is_finite() || temperature < 0.0)
		{
			return Err(Error::Validation {
				message: format!("{label} must be a finite number, zero or greater."),
			});
		}
	}
	for (label, timeout_ms) in [
		("providers.embedding.timeout_ms", cfg.providers.embedding.timeout_ms),
		("providers.rerank.timeout_ms", cfg.providers.rerank.timeout_ms),
		("providers.llm.timeout_ms", cfg.providers.llm.timeout_ms),
		("storage.qdrant.timeout_ms", cfg.storage.qdrant.timeout_ms),
	] {
		if timeout_ms == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	for collection in cfg.collections.values_mut() {
		if collection.name.as_deref().map(|name| name.trim().is_empty()).unwrap_or(false) {
			collection.name = None;
		}

		collection.keywords = collection
			.keywords
			.iter()
			.map(|keyword| keyword.trim().to_lowercase())
			.filter(|keyword| !keyword.is_empty())
			.collect();
	}

	cfg.router.scheduling_keywords = cfg
		.router
		.scheduling_keywords
		.iter()
		.map(|keyword| keyword.trim().to_lowercase())
		.filter(|keyword| !keyword.is_empty())
		.collect();

	if cfg.router.prompt_template.as_deref().map(|t| t.trim().is_empty()).unwrap_or(false) {
		cfg.router.prompt_template = None;
	}

	for prefix in
		[&mut cfg.providers.embedding.query_prefix, &mut cfg.providers.embedding.document_prefix]
	{
		if prefix.as_deref().map(str::is_empty).unwrap_or(false) {
			*prefix = None;
		}
	}
}
