//! Shared services every player of a reel is mounted against.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{ConfigError, ReelplayConfig};
use crate::player::PlayerId;
use crate::scheduler::Scheduler;
use crate::source::StreamSourceResolver;
use crate::stream::StreamPolicy;
use crate::unlock::SoundUnlockCoordinator;

/// Process-level collaborators handed to each controller at mount.
pub struct EngineContext {
    config: ReelplayConfig,
    coordinator: SoundUnlockCoordinator,
    scheduler: Arc<dyn Scheduler>,
    resolver: StreamSourceResolver,
    stream_policy: StreamPolicy,
    next_player: AtomicU64,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .field("unlocked", &self.coordinator.is_unlocked())
            .field("next_player", &self.next_player.load(Ordering::Relaxed))
            .finish()
    }
}

impl EngineContext {
    /// Validates `config` and builds the shared resolver and stream policy.
    ///
    /// # Errors
    ///
    /// - `ConfigError` - The configuration failed validation
    pub fn new(
        config: ReelplayConfig,
        coordinator: SoundUnlockCoordinator,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let resolver = StreamSourceResolver::new(&config.resolver);
        let stream_policy = StreamPolicy::from_tuning(&config.stream)?;
        Ok(Self {
            config,
            coordinator,
            scheduler,
            resolver,
            stream_policy,
            next_player: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &ReelplayConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &SoundUnlockCoordinator {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn resolver(&self) -> &StreamSourceResolver {
        &self.resolver
    }

    pub fn stream_policy(&self) -> &StreamPolicy {
        &self.stream_policy
    }

    pub(crate) fn next_player_id(&self) -> PlayerId {
        PlayerId(self.next_player.fetch_add(1, Ordering::Relaxed))
    }
}
