//! Deterministic multi-node simulation harness.
//!
//! Runs N node state machines against in-memory storage on a virtual
//! clock. Network delivery, timers, proposal resolution, block
//! finalization and sync are all executed by the harness in a single
//! thread, in `(time, sequence)` order, so every run of the same scenario
//! is identical.

mod runner;

pub use runner::{Simulation, SimulationConfig};
