//! Adaptive segmented streaming.
//!
//! A [`StreamClient`] fetches manifests and segments and feeds a sink. The
//! [`AdaptiveStreamSession`] owns one client at a time, classifies its faults
//! and recreates it after a fatal one.

pub mod client;
pub mod recovery;
pub mod session;

pub use client::{
    FaultKind, NoStreamSupport, StreamClient, StreamClientFactory, StreamEvent, StreamEventKind,
    StreamFault,
};
pub use recovery::{FaultClassifier, RecoveryAction};
pub use session::{
    AdaptiveStreamSession, SessionContext, SessionDirective, SessionState, StreamPolicy,
};
