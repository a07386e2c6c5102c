//! Boundary between the gateway and the authoritative simulation.
//!
//! The gateway never touches simulation state directly. It reads snapshots
//! and hands off [`CommandIntent`]s through [`SimulationFacade`]; applying
//! them happens on the simulation's own execution context.

pub mod facade;
pub mod local;
pub mod types;

pub use {
    facade::{SimulationError, SimulationFacade},
    local::{Companion, CompanionSeed, LocalSimulation, Task},
    types::{CommandIntent, CompanionSnapshot, Position},
};
