//! Observation orchestrator for the observer.
//!
//! This crate drives one capture session per observation on a worker
//! thread, publishes what it sees through the hub and the cache, and maps
//! inbound hub commands onto observation start/stop and pending requests.

mod config;
mod error;
mod observer;
mod orchestrator;
mod slot;
mod stats;

pub use config::EngineConfig;
pub use error::EngineError;
pub use observer::{Observer, PendingRequests, Sinks};
pub use orchestrator::Engine;
pub use slot::RequestSlot;
pub use stats::{ObservationStats, StatsSnapshot};

use std::sync::Arc;

use crossbeam_channel::Receiver;
use eye_capture::BackendFactory;
use eye_ipc::EyeCommand;
use eye_transport::{HubSink, KeyValueCache};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Cache key of the alignment map shared by every session.
pub const ALIGNMENT_MAP_KEY: &str = "Beholder_Eye_Alignment.json";

/// Info reply to `StartObserving` while a session runs.
pub const ALREADY_OBSERVING: &str = "Beholder Eye was already observing.";

/// Info reply to commands that need a running session.
pub const NOT_OBSERVING: &str = "Beholder Eye was not observing.";

/// Create an engine instance wired to its sinks.
pub fn create_engine(
    command_rx: Receiver<EyeCommand>,
    hub: Arc<dyn HubSink>,
    cache: Arc<dyn KeyValueCache>,
    factory: Arc<dyn BackendFactory>,
    config: EngineConfig,
) -> Engine {
    let stats = Arc::new(ObservationStats::new(config.stats_interval));
    let sinks = Sinks::with_stats(hub, cache, stats);
    Engine::new(command_rx, sinks, factory, config)
}
