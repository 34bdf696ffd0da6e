use std::sync::Arc;

use agents::orchestrator::Orchestrator;
use common::{
    llm::ModelGateway,
    storage::{context::ContextCache, db::SurrealDbClient},
    utils::config::AppConfig,
};

/// Shared state of the HTTP surface. Every long-lived collaborator is owned
/// here and injected at startup; handlers only borrow.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub gateway: Arc<dyn ModelGateway>,
    pub orchestrator: Arc<Orchestrator>,
    pub context: Arc<ContextCache>,
    pub config: AppConfig,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        gateway: Arc<dyn ModelGateway>,
        orchestrator: Arc<Orchestrator>,
        context: Arc<ContextCache>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            orchestrator,
            context,
            config,
        }
    }
}
