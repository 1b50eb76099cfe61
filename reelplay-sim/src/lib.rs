//! Reelplay Simulation - deterministic reels on virtual time
//!
//! A [`ReelHarness`] mounts several players against scripted media and one
//! manual clock, so swipes, unlock taps, faults and timers replay identically
//! on every run. Invariants are checked against the observed sinks, not just
//! the controllers' own bookkeeping.

pub mod harness;
pub mod invariants;
pub mod rng;
pub mod scenarios;

pub use harness::ReelHarness;
pub use invariants::{Invariant, InvariantViolation, ReelObservation, default_invariants};
pub use rng::DeterministicRng;
pub use scenarios::{PlayerReport, ScenarioKind, ScenarioReport, run_scenario};

use reelplay_core::ConfigError;

/// Errors raised by the simulation framework.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Invalid simulation config: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    InvariantViolated(InvariantViolation),

    #[error("Unknown scenario: {name}")]
    UnknownScenario { name: String },
}
