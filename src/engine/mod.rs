//! Transfer Engine Module
//!
//! The handle-based download engine the manager drives:
//! - `TransferEngine` / `EngineFactory` traits at the engine seam
//! - Request, status and event types
//! - An in-memory engine for tests and the console simulator

pub mod client;
pub mod memory;
pub mod types;

pub use client::{EngineEventCallback, EngineFactory, TransferEngine};
pub use memory::{EngineCall, InMemoryEngine, SimulationProfile};
pub use types::*;
