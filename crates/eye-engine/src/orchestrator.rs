//! Main engine command loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use eye_capture::BackendFactory;
use eye_ipc::{AlignRequest, EyeCommand, EyeEvent, EyeState, ObservationRequest, SnapshotRequest};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::observer::{Observer, PendingRequests, Sinks};
use crate::stats::StatsSnapshot;
use crate::{EngineResult, ALREADY_OBSERVING, NOT_OBSERVING};

/// The observer engine.
///
/// Owns at most one observation worker and routes hub commands to it.
pub struct Engine {
    command_rx: Receiver<EyeCommand>,
    sinks: Sinks,
    factory: Arc<dyn BackendFactory>,
    config: EngineConfig,
    state: Arc<RwLock<EyeState>>,
    pending: Arc<PendingRequests>,
    observer_thread: Option<JoinHandle<EngineResult<()>>>,
    should_stop: Arc<AtomicBool>,
}

impl Engine {
    /// Create a new engine.
    pub fn new(
        command_rx: Receiver<EyeCommand>,
        sinks: Sinks,
        factory: Arc<dyn BackendFactory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            command_rx,
            sinks,
            factory,
            config,
            state: Arc::new(RwLock::new(EyeState::Idle)),
            pending: Arc::new(PendingRequests::default()),
            observer_thread: None,
            should_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the engine (blocking) until `Shutdown` or the command channel closes.
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");

        loop {
            match self.command_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => self.reap_observer(),
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    break;
                }
            }
        }

        if self.is_observing() {
            let _ = self.stop_observing();
        }
        info!("Engine stopped");
    }

    /// Current state.
    pub fn state(&self) -> EyeState {
        self.state.read().clone()
    }

    /// Observation counters across all sessions.
    pub fn stats(&self) -> StatsSnapshot {
        self.sinks.stats().snapshot()
    }

    pub fn is_observing(&self) -> bool {
        self.observer_thread.is_some()
    }

    /// Handle a command. Returns false if the engine should stop.
    fn handle_command(&mut self, command: EyeCommand) -> bool {
        debug!(method = command.method(), "Handling command");
        self.reap_observer();

        let result = match command {
            EyeCommand::StartObserving(request) => self.start_observing(request),
            EyeCommand::StopObserving => self.stop_observing(),
            EyeCommand::Align(request) => self.request_alignment(request),
            EyeCommand::Snapshot(request) => self.request_snapshot(request),
            EyeCommand::Shutdown => {
                if self.is_observing() {
                    let _ = self.stop_observing();
                }
                return false;
            }
        };

        match result {
            Ok(()) => {}
            Err(EngineError::AlreadyObserving) => self.reply(ALREADY_OBSERVING),
            Err(EngineError::NotObserving) => self.reply(NOT_OBSERVING),
            Err(e) => {
                error!("Command failed: {}", e);
                *self.state.write() = EyeState::Error {
                    message: e.to_string(),
                };
            }
        }

        true
    }

    /// Start an observation on a new worker thread.
    #[instrument(name = "start_observing", skip(self, request))]
    pub fn start_observing(&mut self, request: ObservationRequest) -> EngineResult<()> {
        if self.is_observing() {
            return Err(EngineError::AlreadyObserving);
        }

        let adapter_index = request.adapter_index.unwrap_or_default();
        let device_index = request.device_index.unwrap_or_default();
        info!(adapter_index, device_index, "Starting observation");

        self.pending.clear();
        self.should_stop.store(false, Ordering::SeqCst);

        let observer = Observer::new(
            request,
            self.sinks.clone(),
            Arc::clone(&self.pending),
            self.config.clone(),
        );
        let factory = Arc::clone(&self.factory);
        let should_stop = Arc::clone(&self.should_stop);

        let handle = thread::Builder::new()
            .name("beholder-observer".to_string())
            .spawn(move || observer.run(factory.as_ref(), &should_stop))
            .map_err(EngineError::Spawn)?;

        self.observer_thread = Some(handle);
        *self.state.write() = EyeState::Observing {
            adapter_index,
            device_index,
        };
        Ok(())
    }

    /// Stop the running observation and wait for its worker.
    #[instrument(name = "stop_observing", skip(self))]
    pub fn stop_observing(&mut self) -> EngineResult<()> {
        let Some(handle) = self.observer_thread.take() else {
            return Err(EngineError::NotObserving);
        };

        info!("Stopping observation");
        self.should_stop.store(true, Ordering::SeqCst);
        let outcome = handle.join();
        self.pending.clear();
        *self.state.write() = EyeState::Idle;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Observation ended with an error: {}", e),
            Err(_) => error!("Observer thread panicked"),
        }
        info!("Observation stopped");
        Ok(())
    }

    /// Queue an alignment for the next frame.
    pub fn request_alignment(&mut self, request: AlignRequest) -> EngineResult<()> {
        if !self.is_observing() {
            return Err(EngineError::NotObserving);
        }
        if self.pending.align.set(request) {
            debug!("Replaced an unserviced align request");
        }
        Ok(())
    }

    /// Queue a snapshot of the next frame.
    pub fn request_snapshot(&mut self, request: SnapshotRequest) -> EngineResult<()> {
        if !self.is_observing() {
            return Err(EngineError::NotObserving);
        }
        if self.pending.snapshot.set(request) {
            debug!("Replaced an unserviced snapshot request");
        }
        Ok(())
    }

    /// Collect a worker that ended on its own.
    fn reap_observer(&mut self) {
        let finished = self
            .observer_thread
            .as_ref()
            .is_some_and(|handle| handle.is_finished());
        if !finished {
            return;
        }
        let Some(handle) = self.observer_thread.take() else {
            return;
        };

        self.pending.clear();
        let state = match handle.join() {
            Ok(Ok(())) => EyeState::Idle,
            Ok(Err(e)) => {
                error!("Observation ended: {}", e);
                EyeState::Error {
                    message: e.to_string(),
                }
            }
            Err(_) => {
                error!("Observer thread panicked");
                EyeState::Error {
                    message: "observer thread panicked".to_string(),
                }
            }
        };
        *self.state.write() = state;
    }

    fn reply(&self, message: &str) {
        debug!(message, "Replying to command");
        self.sinks.publish(EyeEvent::Info(message.to_string()));
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.observer_thread.take() {
            let _ = handle.join();
        }
    }
}
