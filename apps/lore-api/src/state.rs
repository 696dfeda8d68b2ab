use std::sync::Arc;

use lore_service::AnswerOrchestrator;
use lore_storage::qdrant::QdrantStore;

#[derive(Clone)]
pub struct AppState {
	pub orchestrator: Arc<AnswerOrchestrator>,
}
impl AppState {
	pub async fn new(config: lore_config::Config) -> color_eyre::Result<Self> {
		let qdrant = QdrantStore::new(&config.storage.qdrant)?;

		qdrant.ensure_docstore().await?;

		let orchestrator = AnswerOrchestrator::new(config, Arc::new(qdrant));

		Ok(Self::from_orchestrator(orchestrator))
	}

	pub fn from_orchestrator(orchestrator: AnswerOrchestrator) -> Self {
		Self { orchestrator: Arc::new(orchestrator) }
	}
}
