//! Integration tests for Reelplay
//!
//! Whole-reel behavior across the core and the simulation harness: the
//! playback properties every reel must keep, the reference scenarios, and the
//! engine running on real tokio timers.

#[path = "integration/properties.rs"]
mod properties;

#[path = "integration/scenarios.rs"]
mod scenarios;

#[path = "integration/tokio_timers.rs"]
mod tokio_timers;
