use {async_trait::async_trait, uuid::Uuid};

use crate::types::{CommandIntent, CompanionSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    #[error("simulation is not accepting commands")]
    Unavailable,
}

/// What the gateway needs from the simulation.
///
/// Reads may be served from any gateway task. If the host cannot read
/// concurrently, the implementation marshals reads onto its own thread.
#[async_trait]
pub trait SimulationFacade: Send + Sync {
    /// All companions currently alive.
    async fn list(&self) -> Vec<CompanionSnapshot>;

    async fn lookup(&self, id: Uuid) -> Option<CompanionSnapshot>;

    /// Whether `identity` (a player UUID string or name) owns companion `id`.
    async fn is_owned_by(&self, id: Uuid, identity: &str) -> bool;

    /// Queue `intent` for application on the simulation's own context.
    ///
    /// Must return without waiting for the command to run. Intents for the
    /// same entity are applied in the order they were enqueued.
    fn enqueue_command(&self, intent: CommandIntent) -> Result<(), SimulationError>;
}
