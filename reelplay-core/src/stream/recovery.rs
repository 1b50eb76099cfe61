//! Fault classification for adaptive streaming sessions.
//!
//! Maps each client fault to exactly one recovery action so the session never
//! mixes strategies for the same fault.

use regex::Regex;

use super::client::{FaultKind, StreamFault};
use crate::config::{ConfigError, StreamTuning};

/// What a session does about a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Known false positive: log and drop
    Suppress,
    /// Retry loading in place
    ResumeLoading,
    /// Rebuild the corrupted media buffer in place
    RecoverMedia,
    /// Destroy the client and recreate it after a backoff
    Recreate,
}

/// Classifies stream faults into recovery actions.
#[derive(Debug, Clone)]
pub struct FaultClassifier {
    spurious: Regex,
}

impl FaultClassifier {
    /// # Errors
    ///
    /// - `ConfigError::InvalidPattern` - The spurious fault pattern does not compile
    pub fn new(tuning: &StreamTuning) -> Result<Self, ConfigError> {
        let spurious = Regex::new(&tuning.spurious_fault_pattern).map_err(|e| {
            ConfigError::InvalidPattern {
                reason: e.to_string(),
            }
        })?;
        Ok(Self { spurious })
    }

    /// First match wins: spurious warning, network, media, everything else.
    pub fn classify(&self, fault: &StreamFault) -> RecoveryAction {
        if self.is_spurious(fault) {
            return RecoveryAction::Suppress;
        }
        match fault.kind {
            FaultKind::Network => RecoveryAction::ResumeLoading,
            FaultKind::Media => RecoveryAction::RecoverMedia,
            FaultKind::Other => RecoveryAction::Recreate,
        }
    }

    /// Non-fatal faults whose text matches the transport-warning pattern.
    pub fn is_spurious(&self, fault: &StreamFault) -> bool {
        !fault.fatal && self.spurious.is_match(&fault.details)
    }
}
