//! In-process reference simulation.
//!
//! State is owned by a dedicated `simulation` thread that drains an
//! unbounded command queue. After every mutation the thread republishes a
//! copy of the roster behind a lock, which is what gateway reads see.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, PoisonError, RwLock},
    thread,
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio::sync::{mpsc, oneshot},
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use crate::{
    facade::{SimulationError, SimulationFacade},
    types::{CommandIntent, CompanionSnapshot, Position},
};

const DEFAULT_MAX_HEALTH: f32 = 20.0;

/// What a companion is currently doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    #[default]
    Idle,
    Follow,
    Stay,
    MoveTo(Position),
}

/// Full simulation-side state of one companion.
#[derive(Debug, Clone, PartialEq)]
pub struct Companion {
    pub id: Uuid,
    pub name: String,
    pub owner_uuid: Option<Uuid>,
    pub owner_name: Option<String>,
    pub position: Position,
    pub health: f32,
    pub max_health: f32,
    pub task: Task,
    pub skin_type: String,
    pub skin_path: Option<String>,
}

impl Companion {
    pub fn snapshot(&self) -> CompanionSnapshot {
        CompanionSnapshot {
            id: self.id,
            name: self.name.clone(),
            owner_uuid: self.owner_uuid,
            owner_name: self.owner_name.clone(),
            position: self.position,
            health: self.health,
            max_health: self.max_health,
        }
    }

    fn owned_by(&self, identity: &str) -> bool {
        let by_uuid = self
            .owner_uuid
            .is_some_and(|owner| owner.to_string().eq_ignore_ascii_case(identity));
        let by_name = self
            .owner_name
            .as_deref()
            .is_some_and(|owner| owner.eq_ignore_ascii_case(identity));
        by_uuid || by_name
    }

    fn apply(&mut self, command: &str, payload: Option<&Value>) {
        match command {
            "follow" => self.task = Task::Follow,
            "stay" => self.task = Task::Stay,
            "move" => match payload.and_then(parse_position) {
                Some(target) => self.task = Task::MoveTo(target),
                None => warn!(id = %self.id, "move command without x/y/z payload, ignoring"),
            },
            "rename" => match payload.and_then(|p| p.get("name")).and_then(Value::as_str) {
                Some(name) if !name.trim().is_empty() => self.name = name.trim().to_string(),
                _ => warn!(id = %self.id, "rename command without a name, ignoring"),
            },
            "heal" => match payload.and_then(|p| p.get("amount")).and_then(Value::as_f64) {
                Some(amount) if amount > 0.0 => {
                    self.health = (self.health + amount as f32).min(self.max_health);
                },
                _ => warn!(id = %self.id, "heal command without a positive amount, ignoring"),
            },
            "set_skin" => {
                let skin_type = payload
                    .and_then(|p| p.get("skinType"))
                    .and_then(Value::as_str);
                let Some(skin_type) = skin_type else {
                    warn!(id = %self.id, "set_skin command without skinType, ignoring");
                    return;
                };
                self.skin_type = skin_type.to_string();
                self.skin_path = payload
                    .and_then(|p| p.get("skinPath"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
            },
            other => {
                warn!(id = %self.id, command = other, "unknown companion command, ignoring");
                return;
            },
        }
        debug!(id = %self.id, command, "applied companion command");
    }
}

fn parse_position(payload: &Value) -> Option<Position> {
    Some(Position {
        x: payload.get("x")?.as_f64()?,
        y: payload.get("y")?.as_f64()?,
        z: payload.get("z")?.as_f64()?,
    })
}

/// Initial companion definition, as loaded from a roster file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionSeed {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub owner_uuid: Option<Uuid>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub health: Option<f32>,
    #[serde(default)]
    pub max_health: Option<f32>,
}

impl CompanionSeed {
    fn into_companion(self) -> Companion {
        let max_health = self.max_health.unwrap_or(DEFAULT_MAX_HEALTH);
        Companion {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            name: self.name,
            owner_uuid: self.owner_uuid,
            owner_name: self.owner_name,
            position: self.position,
            health: self.health.unwrap_or(max_health).min(max_health),
            max_health,
            task: Task::Idle,
            skin_type: "default".into(),
            skin_path: None,
        }
    }

    /// Read a JSON array of seeds.
    pub fn load_file(path: &Path) -> anyhow::Result<Vec<Self>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Two companions for running the gateway without a roster file.
    pub fn demo_roster() -> Vec<Self> {
        vec![
            Self {
                id: None,
                name: "Pip".into(),
                owner_uuid: None,
                owner_name: Some("admin".into()),
                position: Position {
                    x: 0.5,
                    y: 64.0,
                    z: 0.5,
                },
                health: None,
                max_health: None,
            },
            Self {
                id: None,
                name: "Bramble".into(),
                owner_uuid: Some(Uuid::new_v4()),
                owner_name: Some("steve".into()),
                position: Position {
                    x: 12.0,
                    y: 70.0,
                    z: -8.0,
                },
                health: Some(14.0),
                max_health: None,
            },
        ]
    }
}

enum Op {
    Apply(CommandIntent),
    Barrier(oneshot::Sender<()>),
}

type Roster = Arc<RwLock<HashMap<Uuid, Companion>>>;

/// Reference [`SimulationFacade`] backed by its own thread.
///
/// The thread exits once every handle has been dropped.
pub struct LocalSimulation {
    tx: mpsc::UnboundedSender<Op>,
    published: Roster,
}

impl LocalSimulation {
    pub fn spawn(seeds: Vec<CompanionSeed>) -> std::io::Result<Self> {
        let state: HashMap<Uuid, Companion> = seeds
            .into_iter()
            .map(CompanionSeed::into_companion)
            .map(|c| (c.id, c))
            .collect();
        let published: Roster = Arc::new(RwLock::new(state.clone()));
        let (tx, rx) = mpsc::unbounded_channel();

        let roster = Arc::clone(&published);
        thread::Builder::new()
            .name("simulation".into())
            .spawn(move || run(state, rx, roster))?;

        info!(companions = published_len(&published), "local simulation started");
        Ok(Self { tx, published })
    }

    /// Full state of one companion, including fields not in the snapshot.
    pub fn companion(&self, id: Uuid) -> Option<Companion> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Wait until every command enqueued before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Op::Barrier(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

fn published_len(roster: &Roster) -> usize {
    roster.read().unwrap_or_else(PoisonError::into_inner).len()
}

fn run(mut state: HashMap<Uuid, Companion>, mut rx: mpsc::UnboundedReceiver<Op>, roster: Roster) {
    while let Some(op) = rx.blocking_recv() {
        match op {
            Op::Apply(intent) => {
                let Some(companion) = state.get_mut(&intent.entity_id) else {
                    warn!(id = %intent.entity_id, "command for unknown companion, dropping");
                    continue;
                };
                companion.apply(&intent.command, intent.payload.as_ref());
                let updated = companion.clone();
                roster
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(updated.id, updated);
            },
            Op::Barrier(done) => {
                let _ = done.send(());
            },
        }
    }
    debug!("local simulation stopped");
}

#[async_trait]
impl SimulationFacade for LocalSimulation {
    async fn list(&self) -> Vec<CompanionSnapshot> {
        let roster = self.published.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<CompanionSnapshot> = roster.values().map(Companion::snapshot).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    async fn lookup(&self, id: Uuid) -> Option<CompanionSnapshot> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(Companion::snapshot)
    }

    async fn is_owned_by(&self, id: Uuid, identity: &str) -> bool {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .is_some_and(|c| c.owned_by(identity))
    }

    fn enqueue_command(&self, intent: CommandIntent) -> Result<(), SimulationError> {
        self.tx
            .send(Op::Apply(intent))
            .map_err(|_| SimulationError::Unavailable)
    }
}
