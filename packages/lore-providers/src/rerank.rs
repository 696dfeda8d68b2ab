use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

const PROBE_TEXT: &str = "warm-up";

pub async fn rerank(
	cfg: &lore_config::ProviderConfig,
	query: &str,
	docs: &[String],
) -> Result<Vec<f32>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = crate::endpoint(&cfg.api_base, &cfg.path);
	let body = serde_json::json!({ "model": cfg.model, "query": query, "documents": docs });
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_rerank_response(json, docs.len())
}

/// Scores a single pair to confirm the rerank service is reachable and answering.
pub async fn probe(cfg: &lore_config::ProviderConfig) -> Result<()> {
	let scores = rerank(cfg, PROBE_TEXT, &[PROBE_TEXT.to_string()]).await?;

	if scores.len() != 1 {
		return Err(Error::InvalidResponse {
			message: "Rerank probe returned an unexpected number of scores.".to_string(),
		});
	}

	Ok(())
}

fn parse_rerank_response(json: Value, doc_count: usize) -> Result<Vec<f32>> {
	let mut scores = vec![0.0f32; doc_count];
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Rerank response is missing results array.".to_string(),
		})?;

	for item in results {
		let index = item.get("index").and_then(|v| v.as_u64()).ok_or_else(|| {
			Error::InvalidResponse { message: "Rerank result missing index.".to_string() }
		})? as usize;
		let score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| Error::InvalidResponse {
				message: "Rerank result missing score.".to_string(),
			})? as f32;

		if index < scores.len() {
			scores[index] = score;
		}
	}

	Ok(scores)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn aligns_scores_by_index() {
		let json = serde_json::json!({
			"results": [
				{ "index": 1, "relevance_score": 0.2 },
				{ "index": 0, "relevance_score": 0.9 }
			]
		});
		let scores = parse_rerank_response(json, 2).expect("parse failed");

		assert_eq!(scores, vec![0.9, 0.2]);
	}

	#[test]
	fn accepts_data_and_score_aliases() {
		let json = serde_json::json!({ "data": [{ "index": 0, "score": 0.4 }] });
		let scores = parse_rerank_response(json, 2).expect("parse failed");

		assert_eq!(scores, vec![0.4, 0.0]);
	}

	#[test]
	fn missing_index_is_an_error() {
		let json = serde_json::json!({ "results": [{ "relevance_score": 0.4 }] });

		assert!(parse_rerank_response(json, 1).is_err());
	}
}
