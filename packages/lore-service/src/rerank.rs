use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};

use tokio::sync::OnceCell;

use lore_config::Config;
use lore_domain::{dedup, records::RetrievedFragment};

use crate::RerankProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct RerankOutcome {
	pub fragments: Vec<RetrievedFragment>,
	/// False when the pre-rerank order was truncated instead.
	pub applied: bool,
}

/// Cross-encoder reranking with one-time warm-up.
///
/// A failed warm-up or rerank call disables the component for the life of the process.
pub struct Reranker {
	cfg: Arc<Config>,
	provider: Arc<dyn RerankProvider>,
	ready: OnceCell<bool>,
	disabled: AtomicBool,
}
impl Reranker {
	pub fn new(cfg: Arc<Config>, provider: Arc<dyn RerankProvider>) -> Self {
		Self { cfg, provider, ready: OnceCell::new(), disabled: AtomicBool::new(false) }
	}

	pub fn is_disabled(&self) -> bool {
		self.disabled.load(Ordering::Acquire)
	}

	/// Runs the warm-up probe once. Concurrent callers wait on the same attempt.
	pub async fn ensure_ready(&self) -> bool {
		let ready = *self
			.ready
			.get_or_init(|| async {
				match self.provider.probe(&self.cfg.providers.rerank).await {
					Ok(()) => {
						tracing::info!(model = %self.cfg.providers.rerank.model, "Reranker ready.");

						true
					},
					Err(err) => {
						tracing::warn!(error = %err, "Reranker warm-up failed. Reranking disabled.");

						false
					},
				}
			})
			.await;

		if !ready {
			self.disabled.store(true, Ordering::Release);
		}

		ready
	}

	/// Reorders `candidates` by rerank score and keeps the best `top_k`.
	pub async fn rerank(
		&self,
		query: &str,
		mut candidates: Vec<RetrievedFragment>,
		top_k: usize,
	) -> RerankOutcome {
		if self.is_disabled() || !self.ensure_ready().await {
			candidates.truncate(top_k);

			return RerankOutcome { fragments: candidates, applied: false };
		}
		if candidates.is_empty() {
			return RerankOutcome { fragments: candidates, applied: true };
		}

		let docs: Vec<String> = candidates.iter().map(|fragment| fragment.text.clone()).collect();
		let scores = match self.provider.rerank(&self.cfg.providers.rerank, query, &docs).await {
			Ok(scores) if scores.len() == candidates.len() => scores,
			Ok(scores) => {
				tracing::warn!(
					expected = candidates.len(),
					actual = scores.len(),
					"Rerank score count mismatch. Reranking disabled."
				);
				self.disabled.store(true, Ordering::Release);
				candidates.truncate(top_k);

				return RerankOutcome { fragments: candidates, applied: false };
			},
			Err(err) => {
				tracing::warn!(error = %err, "Rerank call failed. Reranking disabled.");
				self.disabled.store(true, Ordering::Release);
				candidates.truncate(top_k);

				return RerankOutcome { fragments: candidates, applied: false };
			},
		};

		for (fragment, score) in candidates.iter_mut().zip(scores) {
			fragment.score = score;
		}

		dedup::sort_by_score(&mut candidates);
		candidates.truncate(top_k);

		RerankOutcome { fragments: candidates, applied: true }
	}
}
