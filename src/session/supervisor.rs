//! Connection supervision for interactive sessions
//!
//! Wraps one interactive transport with:
//! - a single automatic retry of a failed initial connect
//! - a periodic liveness monitor that tells an unexpected drop apart from a
//!   user-initiated disconnect
//! - duplicate Enter suppression on outbound input

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::framer::FramingMode;
use super::input_gate::InputGate;
use super::sink::SharedSink;
use crate::ssh::{ConnectionDescriptor, SshError, Transport, TransportFactory};

/// Supervisor timing
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Liveness poll period
    pub monitor_interval: Duration,
    /// Delay before the one automatic retry
    pub retry_delay: Duration,
    /// Window in which a repeated Enter is dropped
    pub dedup_window: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_millis(1500),
            retry_delay: Duration::from_millis(1200),
            dedup_window: Duration::from_millis(150),
        }
    }
}

/// Lifecycle of the supervised connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting { retrying: bool },
    Connected,
    /// Initial connect failed twice; carries the second attempt's message
    Failed(String),
    /// Closed by the user
    Disconnected,
    /// A healthy session dropped on its own
    ReconnectNeeded,
}

impl ConnectionState {
    /// Status text, most specific state first
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting { retrying: true } => "Retrying",
            ConnectionState::Connecting { retrying: false } => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::ReconnectNeeded => "Reconnect needed",
            ConnectionState::Failed(_) => "Connection failed",
            ConnectionState::Idle | ConnectionState::Disconnected => "Disconnected",
        }
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting { .. })
    }
}

/// Events emitted to the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    StateChanged(ConnectionState),
    AttemptFailed { attempt: u32, error: String },
    /// The monitor found a previously connected session dead
    ConnectionLost,
}

pub struct ConnectionSupervisor<F: TransportFactory> {
    factory: F,
    config: SupervisorConfig,
    transport: RwLock<Option<Arc<F::Transport>>>,
    state: Mutex<ConnectionState>,
    gate: Mutex<InputGate>,
    /// Set by a user disconnect that arrives while a connect is in flight
    abandon_connect: AtomicBool,
    events: broadcast::Sender<SupervisorEvent>,
}

impl<F: TransportFactory> ConnectionSupervisor<F> {
    pub fn new(factory: F, config: SupervisorConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            gate: Mutex::new(InputGate::new(config.dedup_window)),
            factory,
            config,
            transport: RwLock::new(None),
            state: Mutex::new(ConnectionState::Idle),
            abandon_connect: AtomicBool::new(false),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.current_transport().is_some_and(|t| t.is_connected())
    }

    /// Connect an interactive session, retrying once after `retry_delay`.
    ///
    /// If the retry fails too, its error is returned and the state becomes
    /// [`ConnectionState::Failed`].
    pub async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        sink: SharedSink,
    ) -> Result<(), SshError> {
        if self.state().is_connecting() {
            return Err(SshError::Config(
                "A connection attempt is already in progress".to_string(),
            ));
        }
        self.release_transport().await;
        self.abandon_connect.store(false, Ordering::SeqCst);

        self.set_state(ConnectionState::Connecting { retrying: false });
        let first = match self.attempt(descriptor, sink.clone()).await {
            Ok(transport) => return self.install(transport).await,
            Err(e) => e,
        };

        warn!(
            "Connect to {} failed, retrying in {:?}: {}",
            descriptor.display_target(),
            self.config.retry_delay,
            first
        );
        self.emit(SupervisorEvent::AttemptFailed {
            attempt: 1,
            error: first.user_message(),
        });
        tokio::time::sleep(self.config.retry_delay).await;
        if self.connect_abandoned() {
            return Err(SshError::Disconnected);
        }

        self.set_state(ConnectionState::Connecting { retrying: true });
        match self.attempt(descriptor, sink).await {
            Ok(transport) => self.install(transport).await,
            Err(_) if self.connect_abandoned() => Err(SshError::Disconnected),
            Err(second) => {
                warn!(
                    "Retry to {} failed: {}",
                    descriptor.display_target(),
                    second
                );
                self.emit(SupervisorEvent::AttemptFailed {
                    attempt: 2,
                    error: second.user_message(),
                });
                self.set_state(ConnectionState::Failed(second.user_message()));
                Err(second)
            }
        }
    }

    /// User-initiated disconnect.
    ///
    /// While a connect is in flight the attempt is left to finish, then its
    /// transport is released instead of being reported as connected.
    pub async fn disconnect(&self) {
        if self.state().is_connecting() {
            info!("Disconnect requested during connect");
            self.abandon_connect.store(true, Ordering::SeqCst);
        }
        self.release_transport().await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// One monitor tick. Returns true when an unexpected drop was detected.
    ///
    /// Only reads liveness; skipped entirely while a connect is in flight.
    pub async fn check_liveness(&self) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }
        if self.is_connected() {
            return false;
        }

        warn!("Connected session dropped unexpectedly");
        self.release_transport().await;
        self.set_state(ConnectionState::ReconnectNeeded);
        self.emit(SupervisorEvent::ConnectionLost);
        true
    }

    /// Send interactive input; a rapid duplicate Enter is silently dropped
    pub async fn send_input(&self, text: &str) -> Result<(), SshError> {
        let transport = self.live_transport()?;
        if !self.gate.lock().admit(text) {
            debug!("Dropped duplicate Enter");
            return Ok(());
        }
        transport.send_raw(text).await
    }

    pub async fn send_command(&self, command: &str) -> Result<(), SshError> {
        self.live_transport()?.send_command(command).await
    }

    /// Forward a surface resize to the PTY
    pub async fn resize(
        &self,
        cols: u32,
        rows: u32,
        pixel_width: u32,
        pixel_height: u32,
    ) -> Result<(), SshError> {
        self.live_transport()?
            .resize(cols, rows, pixel_width, pixel_height)
            .await
    }

    async fn attempt(
        &self,
        descriptor: &ConnectionDescriptor,
        sink: SharedSink,
    ) -> Result<F::Transport, SshError> {
        let transport = self.factory.create(descriptor);
        match transport.connect(sink, FramingMode::Interactive).await {
            Ok(()) => Ok(transport),
            Err(e) => {
                transport.disconnect().await;
                Err(e)
            }
        }
    }

    async fn install(&self, transport: F::Transport) -> Result<(), SshError> {
        if self.connect_abandoned() {
            transport.disconnect().await;
            return Err(SshError::Disconnected);
        }
        *self.transport.write() = Some(Arc::new(transport));
        self.gate.lock().reset();
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Consume a pending user disconnect; the state ends up `Disconnected`
    fn connect_abandoned(&self) -> bool {
        if self.abandon_connect.swap(false, Ordering::SeqCst) {
            debug!("Connect abandoned by user disconnect");
            self.set_state(ConnectionState::Disconnected);
            true
        } else {
            false
        }
    }

    async fn release_transport(&self) {
        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            transport.disconnect().await;
        }
    }

    fn current_transport(&self) -> Option<Arc<F::Transport>> {
        self.transport.read().clone()
    }

    fn live_transport(&self) -> Result<Arc<F::Transport>, SshError> {
        if self.state().is_connecting() {
            return Err(SshError::NotConnected);
        }
        self.current_transport()
            .filter(|t| t.is_connected())
            .ok_or(SshError::NotConnected)
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = {
            let mut current = self.state.lock();
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        };
        if changed {
            info!("Connection state: {}", state.label());
            self.emit(SupervisorEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

impl<F> ConnectionSupervisor<F>
where
    F: TransportFactory + 'static,
{
    /// Start the periodic liveness monitor.
    ///
    /// The task holds only a weak reference and ends once the supervisor is
    /// dropped.
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.monitor_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(supervisor) = weak.upgrade() else {
                    debug!("Supervisor dropped, monitor exiting");
                    break;
                };
                supervisor.check_liveness().await;
            }
        })
    }
}
