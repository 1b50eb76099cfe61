//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Subcommand, ValueEnum};
use reelplay_core::scheduler::{Scheduler, TokioScheduler};
use reelplay_core::testing::{AutoplayPolicy, ScriptedMedia};
use reelplay_core::{
    ActivationGate, CallbackObserver, EngineContext, PlaybackConfig, PlaybackLifecycleController,
    ReelplayConfig, SoundUnlockCoordinator, SourceKind, StreamSourceResolver,
    UnlockAffordanceController,
};
use reelplay_sim::{ScenarioKind, ScenarioReport, run_scenario};
use tokio::time::Instant;
use tracing::info;

/// How often the live demo delivers media events.
const LIVE_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Embedded,
    Stream,
    File,
}

impl From<KindArg> for SourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Embedded => SourceKind::Embedded,
            KindArg::Stream => SourceKind::Stream,
            KindArg::File => SourceKind::File,
        }
    }
}

/// Autoplay rules of the scripted runtime used by `live`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PolicyArg {
    Permissive,
    MutedOnly,
    GestureBound,
    DenyAll,
}

impl From<PolicyArg> for AutoplayPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Permissive => AutoplayPolicy::Permissive,
            PolicyArg::MutedOnly => AutoplayPolicy::MutedOnly,
            PolicyArg::GestureBound => AutoplayPolicy::GestureBound,
            PolicyArg::DenyAll => AutoplayPolicy::DenyAll,
        }
    }
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Classify a source URL and print the normalized form
    Resolve {
        url: String,
        /// Kind declared by the author
        #[arg(long, value_enum, default_value = "file")]
        kind: KindArg,
    },
    /// Evaluate the activation gate for one combination of inputs
    Gate {
        #[arg(long)]
        active: bool,
        #[arg(long)]
        unlocked: bool,
        #[arg(long)]
        autoplay: bool,
    },
    /// Run deterministic scenarios on virtual time
    Simulate {
        /// Scenario name; all scenarios when omitted
        scenario: Option<String>,
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Print full JSON reports
        #[arg(long)]
        json: bool,
    },
    /// Play one element on wall-clock time against a scripted runtime
    Live {
        /// Element configuration as authoring-layer JSON
        #[arg(long, conflicts_with = "url")]
        config: Option<PathBuf>,
        /// Background clip URL, used when no config file is given
        #[arg(long, default_value = "https://cdn.example.com/reel/intro.mp4")]
        url: String,
        #[arg(long, value_enum, default_value = "muted-only")]
        policy: PolicyArg,
        /// Tap the sound control after this many milliseconds
        #[arg(long)]
        unlock_after: Option<u64>,
        #[arg(long, default_value = "4000")]
        duration_ms: u64,
    },
    /// Print the effective engine configuration
    Config,
}

/// Dispatches a parsed command.
///
/// # Errors
///
/// Propagates configuration, parse and runtime errors with context.
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Resolve { url, kind } => resolve(url, kind),
        Commands::Gate {
            active,
            unlocked,
            autoplay,
        } => {
            let patch = ActivationGate::decide(active, unlocked, autoplay);
            println!("{}", serde_json::to_string_pretty(&patch)?);
            Ok(())
        }
        Commands::Simulate {
            scenario,
            seed,
            json,
        } => simulate(scenario, seed, json),
        Commands::Live {
            config,
            url,
            policy,
            unlock_after,
            duration_ms,
        } => {
            let element = match config {
                Some(path) => {
                    let json = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?;
                    PlaybackConfig::from_json(&json)?
                }
                None => PlaybackConfig::background(SourceKind::File, url),
            };
            live(
                element,
                policy.into(),
                unlock_after.map(Duration::from_millis),
                Duration::from_millis(duration_ms),
            )
            .await
        }
        Commands::Config => {
            let config = ReelplayConfig::from_env();
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn resolve(url: String, kind: KindArg) -> anyhow::Result<()> {
    let config = ReelplayConfig::from_env();
    config.validate()?;
    let resolver = StreamSourceResolver::new(&config.resolver);
    let resolved = resolver.resolve(&PlaybackConfig::background(kind.into(), url));
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}

fn simulate(scenario: Option<String>, seed: u64, json: bool) -> anyhow::Result<()> {
    let scenarios = match scenario {
        Some(name) => vec![name.parse::<ScenarioKind>()?],
        None => ScenarioKind::ALL.to_vec(),
    };

    let mut failed = 0;
    for kind in scenarios {
        let report = run_scenario(kind, seed, ReelplayConfig::from_env())?;
        if !report.passed() {
            failed += 1;
        }
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_summary(&report);
        }
    }

    anyhow::ensure!(failed == 0, "{failed} scenario(s) violated invariants");
    Ok(())
}

fn print_summary(report: &ScenarioReport) {
    let verdict = if report.passed() { "ok" } else { "FAILED" };
    println!(
        "{:<22} {:<6} t={}ms unlocked={}",
        report.scenario.name(),
        verdict,
        report.virtual_time_ms,
        report.unlocked
    );
    for player in &report.players {
        println!(
            "  slide {}: {} muted={} active={} pos={}ms affordance={}",
            player.slide,
            player.state,
            player.muted,
            player.active,
            player.position_ms,
            player.affordance_visible
        );
    }
    for violation in &report.violations {
        println!("  {violation}");
    }
}

async fn live(
    element: PlaybackConfig,
    policy: AutoplayPolicy,
    unlock_after: Option<Duration>,
    duration: Duration,
) -> anyhow::Result<()> {
    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new()?);
    let context = EngineContext::new(
        ReelplayConfig::from_env(),
        SoundUnlockCoordinator::new(),
        scheduler,
    )?;
    let media = ScriptedMedia::new(policy);
    let (backend, _sink) = media.backend();

    let player = PlaybackLifecycleController::mount(element, backend, &context);
    player.add_observer(Arc::new(
        CallbackObserver::new()
            .on_play_start(|id| info!("{id} started playing"))
            .on_play_pause(|id| info!("{id} paused")),
    ));
    let affordance = UnlockAffordanceController::attach(&player, &context);
    let mut updates = player.watch();
    let mut visibility = affordance.watch();

    player.set_active(true);
    let started = Instant::now();
    let mut tick = tokio::time::interval(LIVE_TICK);
    let mut tapped = false;

    while started.elapsed() < duration {
        tick.tick().await;
        media.advance_playback(LIVE_TICK);
        media.settle(&player);

        if !tapped && unlock_after.is_some_and(|after| started.elapsed() >= after) {
            tapped = true;
            media.with_gesture(|| affordance.unlock_sound());
            media.settle(&player);
        }

        if updates.has_changed().unwrap_or(false) {
            let snapshot = updates.borrow_and_update().clone();
            println!(
                "{:>6}ms  {}  muted={}",
                started.elapsed().as_millis(),
                snapshot.state(),
                snapshot.session.muted
            );
        }
        if visibility.has_changed().unwrap_or(false) {
            let visible = *visibility.borrow_and_update();
            println!(
                "{:>6}ms  tap-for-sound {}",
                started.elapsed().as_millis(),
                if visible { "shown" } else { "hidden" }
            );
        }
    }

    println!("{}", serde_json::to_string_pretty(&player.snapshot())?);
    Ok(())
}
