use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicUsize, Ordering},
};

use {async_trait::async_trait, uuid::Uuid};

use {
    tether_auth::{Credentials, TokenService, hash_password},
    tether_config::WebInterfaceConfig,
    tether_simulation::{
        CommandIntent, CompanionSeed, CompanionSnapshot, LocalSimulation, Position,
        SimulationError, SimulationFacade,
    },
};

use crate::state::GatewayState;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "hunter2";

pub fn credentials() -> Arc<Credentials> {
    static HASH: OnceLock<String> = OnceLock::new();
    let hash = HASH.get_or_init(|| hash_password(PASSWORD).unwrap());
    Arc::new(Credentials::new(USERNAME, hash.clone()).unwrap())
}

pub fn tokens() -> Arc<TokenService> {
    Arc::new(TokenService::new(b"gateway-test-key".to_vec()).unwrap())
}

pub fn seed(name: &str, owner: &str) -> CompanionSeed {
    CompanionSeed {
        id: Some(Uuid::new_v4()),
        name: name.into(),
        owner_uuid: None,
        owner_name: Some(owner.into()),
        position: Position::default(),
        health: None,
        max_health: None,
    }
}

/// `LocalSimulation` that records how often the roster was listed.
pub struct CountingSimulation {
    pub inner: LocalSimulation,
    lists: AtomicUsize,
}

impl CountingSimulation {
    pub fn new(seeds: Vec<CompanionSeed>) -> Self {
        Self {
            inner: LocalSimulation::spawn(seeds).unwrap(),
            lists: AtomicUsize::new(0),
        }
    }

    pub fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SimulationFacade for CountingSimulation {
    async fn list(&self) -> Vec<CompanionSnapshot> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list().await
    }

    async fn lookup(&self, id: Uuid) -> Option<CompanionSnapshot> {
        self.inner.lookup(id).await
    }

    async fn is_owned_by(&self, id: Uuid, identity: &str) -> bool {
        self.inner.is_owned_by(id, identity).await
    }

    fn enqueue_command(&self, intent: CommandIntent) -> Result<(), SimulationError> {
        self.inner.enqueue_command(intent)
    }
}

/// Serves reads from its roster but refuses every command.
pub struct OfflineSimulation(pub LocalSimulation);

#[async_trait]
impl SimulationFacade for OfflineSimulation {
    async fn list(&self) -> Vec<CompanionSnapshot> {
        self.0.list().await
    }

    async fn lookup(&self, id: Uuid) -> Option<CompanionSnapshot> {
        self.0.lookup(id).await
    }

    async fn is_owned_by(&self, id: Uuid, identity: &str) -> bool {
        self.0.is_owned_by(id, identity).await
    }

    fn enqueue_command(&self, _intent: CommandIntent) -> Result<(), SimulationError> {
        Err(SimulationError::Unavailable)
    }
}

pub fn state_with(web: &WebInterfaceConfig, simulation: Arc<dyn SimulationFacade>) -> Arc<GatewayState> {
    GatewayState::new(web, tokens(), credentials(), simulation)
}

pub fn counting_state() -> (Arc<GatewayState>, Arc<CountingSimulation>) {
    let sim = Arc::new(CountingSimulation::new(vec![seed("Pip", USERNAME)]));
    let state = state_with(&WebInterfaceConfig::default(), Arc::clone(&sim) as Arc<dyn SimulationFacade>);
    (state, sim)
}
