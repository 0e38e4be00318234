//! Hub client.
//!
//! The hub speaks newline-delimited JSON: every line is one
//! [`HubInvocation`]. Outbound invocations are fire-and-forget; inbound
//! invocations are parsed into [`EyeCommand`]s and forwarded to the engine.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use eye_ipc::{EyeCommand, EyeEvent, HubInvocation};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, error::TrySendError as QueueError};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

use crate::connection::{ConnectionState, ReconnectPolicy};
use crate::error::TransportError;
use crate::{TransportResult, MAX_LINE_LENGTH, OUTBOUND_CHANNEL_CAPACITY};

/// Status message sent after every successful (re)connect.
pub const CONNECTED_STATUS: &str = "Eye Connected.";

/// How often an idle connection checks the stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

type HubFramed = Framed<TcpStream, LinesCodec>;

/// Destination for hub invocations.
pub trait HubSink: Send + Sync {
    /// Send an invocation without waiting for the hub.
    fn invoke(&self, invocation: HubInvocation) -> TransportResult<()>;

    /// Send an event in its wire form.
    fn publish(&self, event: EyeEvent) -> TransportResult<()> {
        self.invoke(event.into_invocation()?)
    }
}

/// Cloneable sending half of a [`HubClient`].
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubInvocation>,
    state: Arc<RwLock<ConnectionState>>,
}

impl HubHandle {
    /// Current connection state of the owning client.
    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }
}

impl HubSink for HubHandle {
    fn invoke(&self, invocation: HubInvocation) -> TransportResult<()> {
        if !self.state.read().is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.sender.try_send(invocation).map_err(|e| match e {
            QueueError::Full(_) => TransportError::QueueFull,
            QueueError::Closed(_) => TransportError::ChannelDisconnected,
        })
    }
}

/// Hub client with automatic reconnect.
pub struct HubClient {
    url: String,
    addr: String,
    state: Arc<RwLock<ConnectionState>>,
    runtime: Option<Runtime>,
    should_stop: Arc<AtomicBool>,
    handle: Option<HubHandle>,
    reconnect_policy: ReconnectPolicy,
    invocations_sent: Arc<AtomicU64>,
}

impl HubClient {
    /// Create a client for a `tcp://host:port` hub URL.
    pub fn new(url: &str) -> TransportResult<Self> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if parsed.scheme() != "tcp" {
            return Err(TransportError::InvalidUrl(
                "URL must start with tcp://".to_string(),
            ));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("Missing host".to_string()))?;
        let port = parsed
            .port()
            .ok_or_else(|| TransportError::InvalidUrl("Missing port".to_string()))?;

        Ok(Self {
            url: url.to_string(),
            addr: format!("{}:{}", host, port),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            runtime: None,
            should_stop: Arc::new(AtomicBool::new(false)),
            handle: None,
            reconnect_policy: ReconnectPolicy::default(),
            invocations_sent: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Replace the reconnect policy. Takes effect on the next `connect`.
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// Start the connection task.
    ///
    /// Returns immediately; the task keeps (re)connecting in the background
    /// and forwards inbound commands to `commands`.
    #[instrument(name = "hub_connect", skip(self, commands), fields(url = %self.url))]
    pub fn connect(&mut self, commands: Sender<EyeCommand>) -> TransportResult<HubHandle> {
        if self.runtime.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        info!("Connecting to hub");
        *self.state.write() = ConnectionState::Connecting;

        let runtime = Runtime::new().map_err(TransportError::Io)?;
        let (sender, receiver) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        self.should_stop.store(false, Ordering::SeqCst);
        let task = HubTask {
            addr: self.addr.clone(),
            outbound: receiver,
            commands,
            state: Arc::clone(&self.state),
            should_stop: Arc::clone(&self.should_stop),
            policy: self.reconnect_policy.clone(),
            invocations_sent: Arc::clone(&self.invocations_sent),
        };

        runtime.spawn(async move {
            task.run().await;
        });

        let handle = HubHandle {
            sender,
            state: Arc::clone(&self.state),
        };
        self.runtime = Some(runtime);
        self.handle = Some(handle.clone());

        Ok(handle)
    }

    /// Stop the connection task and close the socket.
    #[instrument(name = "hub_disconnect", skip(self))]
    pub fn disconnect(&mut self) -> TransportResult<()> {
        self.should_stop.store(true, Ordering::SeqCst);
        self.handle = None;

        if let Some(runtime) = self.runtime.take() {
            info!("Disconnecting from hub");
            runtime.shutdown_timeout(Duration::from_secs(5));
        }

        *self.state.write() = ConnectionState::Disconnected;
        Ok(())
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected()
    }

    /// Number of invocations written to the hub.
    pub fn invocations_sent(&self) -> u64 {
        self.invocations_sent.load(Ordering::Relaxed)
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

enum SessionEnd {
    Stopped,
    Lost(TransportError),
}

struct HubTask {
    addr: String,
    outbound: mpsc::Receiver<HubInvocation>,
    commands: Sender<EyeCommand>,
    state: Arc<RwLock<ConnectionState>>,
    should_stop: Arc<AtomicBool>,
    policy: ReconnectPolicy,
    invocations_sent: Arc<AtomicU64>,
}

impl HubTask {
    async fn run(mut self) {
        let mut attempt = 0u32;
        let mut connected_before = false;

        loop {
            if self.should_stop.load(Ordering::SeqCst) {
                break;
            }

            match TcpStream::connect(&self.addr).await {
                Ok(stream) => {
                    let mut framed =
                        Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
                    *self.state.write() = ConnectionState::Connected;
                    attempt = 0;

                    if connected_before {
                        info!(addr = %self.addr, "Reconnected to hub");
                    } else {
                        info!(addr = %self.addr, "Connected to hub");
                    }
                    connected_before = true;

                    let end = match self.send_status(&mut framed).await {
                        Ok(()) => self.pump(&mut framed).await,
                        Err(e) => SessionEnd::Lost(e),
                    };
                    match end {
                        SessionEnd::Stopped => break,
                        SessionEnd::Lost(e) => warn!("Hub connection lost: {}", e),
                    }
                }
                Err(e) => {
                    warn!("Hub connection attempt {} failed: {}", attempt + 1, e);
                }
            }

            attempt += 1;
            *self.state.write() = ConnectionState::Reconnecting { attempt };
            let delay = self.policy.next_delay();
            info!("Reconnecting to hub in {:?}...", delay);
            tokio::time::sleep(delay).await;
        }

        *self.state.write() = ConnectionState::Disconnected;
        debug!("Hub task finished");
    }

    async fn send_status(&self, framed: &mut HubFramed) -> TransportResult<()> {
        let status = EyeEvent::Status(CONNECTED_STATUS.to_string()).into_invocation()?;
        self.write(framed, &status).await
    }

    async fn write(&self, framed: &mut HubFramed, invocation: &HubInvocation) -> TransportResult<()> {
        let line = serde_json::to_string(invocation)?;
        framed
            .send(line)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.invocations_sent.fetch_add(1, Ordering::Relaxed);
        trace!(target = %invocation.target, "Invocation sent");
        Ok(())
    }

    async fn pump(&mut self, framed: &mut HubFramed) -> SessionEnd {
        loop {
            if self.should_stop.load(Ordering::SeqCst) {
                return SessionEnd::Stopped;
            }

            tokio::select! {
                outgoing = self.outbound.recv() => match outgoing {
                    Some(invocation) => {
                        if let Err(e) = self.write(framed, &invocation).await {
                            return SessionEnd::Lost(e);
                        }
                    }
                    None => {
                        debug!("Outbound channel closed");
                        return SessionEnd::Stopped;
                    }
                },
                incoming = framed.next() => match incoming {
                    Some(Ok(line)) => {
                        if !self.dispatch(&line) {
                            return SessionEnd::Stopped;
                        }
                    }
                    Some(Err(e)) => {
                        return SessionEnd::Lost(TransportError::ConnectionLost(e.to_string()));
                    }
                    None => {
                        return SessionEnd::Lost(TransportError::ConnectionLost(
                            "closed by hub".to_string(),
                        ));
                    }
                },
                _ = tokio::time::sleep(STOP_POLL_INTERVAL) => {}
            }
        }
    }

    /// Forward one inbound line. Returns `false` once the engine is gone.
    fn dispatch(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return true;
        }

        let invocation: HubInvocation = match serde_json::from_str(line) {
            Ok(invocation) => invocation,
            Err(e) => {
                warn!("Ignoring malformed hub message: {}", e);
                return true;
            }
        };

        let command = match EyeCommand::from_invocation(&invocation) {
            Ok(command) => command,
            Err(e) => {
                warn!("Ignoring hub message: {}", e);
                return true;
            }
        };

        debug!(method = command.method(), "Received command");
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                error!(method = command.method(), "Command channel full, dropping command");
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Command channel disconnected");
                false
            }
        }
    }
}

/// Hub sink that records every invocation in memory.
///
/// Stands in for the hub in engine and observer tests.
#[derive(Default)]
pub struct RecordingHub {
    invocations: Mutex<Vec<HubInvocation>>,
    unavailable: AtomicBool,
}

impl RecordingHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent invocations fail with `NotConnected`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Everything recorded so far.
    pub fn invocations(&self) -> Vec<HubInvocation> {
        self.invocations.lock().clone()
    }

    /// Recorded `EyeReport` invocations with the given sub-type.
    pub fn reports(&self, report_type: &str) -> Vec<HubInvocation> {
        self.invocations
            .lock()
            .iter()
            .filter(|i| {
                i.target == eye_ipc::EYE_REPORT_TARGET
                    && i.arguments.first().and_then(|a| a.as_str()) == Some(report_type)
            })
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.invocations.lock().clear();
    }
}

impl HubSink for RecordingHub {
    fn invoke(&self, invocation: HubInvocation) -> TransportResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.invocations.lock().push(invocation);
        Ok(())
    }
}
