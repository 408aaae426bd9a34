//! SSH Session management
//!
//! An [`SshSession`] owns at most one active shell at a time: the target
//! connection (behind its handle owner task), the optional jump tunnel, and
//! the shell channel driven by a background reader task.
//!
//! Teardown always runs in the same order, both on `disconnect()` and when
//! establishment fails halfway: shell channel, tunnel forward, target
//! session, relay session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::auth::{AuthPlan, Credentials};
use super::client::open_session;
use super::config::{ConnectionDescriptor, TransportSettings};
use super::error::SshError;
use super::handle_owner::{spawn_handle_owner_task, HandleController};
use super::transport::{command_line, Transport};
use super::tunnel::JumpTunnel;
use crate::session::{FramingMode, SharedSink, StreamFramer};

const CTRL_C: &str = "\u{3}";
const CTRL_D: &str = "\u{4}";

/// Commands handled by the shell reader task
pub(crate) enum SessionCommand {
    /// Write to the shell's stdin; the reply fires once the write completed
    Data {
        bytes: Vec<u8>,
        reply_tx: oneshot::Sender<Result<(), SshError>>,
    },
    Resize {
        cols: u32,
        rows: u32,
        pixel_width: u32,
        pixel_height: u32,
    },
    /// Close the channel and stop reading
    Close,
}

/// Lock-free view of the active shell, used by sends and liveness checks
#[derive(Clone)]
struct ShellLink {
    session_id: String,
    controller: HandleController,
    cmd_tx: mpsc::Sender<SessionCommand>,
    channel_open: Arc<AtomicBool>,
}

impl ShellLink {
    fn is_alive(&self) -> bool {
        self.controller.is_connected() && self.channel_open.load(Ordering::Acquire)
    }
}

/// Resources released on disconnect, in teardown order
#[derive(Default)]
struct Owned {
    reader: Option<JoinHandle<()>>,
    tunnel: Option<JumpTunnel>,
}

/// SSH shell session with an optional relay hop
pub struct SshSession {
    descriptor: ConnectionDescriptor,
    settings: TransportSettings,
    link: RwLock<Option<ShellLink>>,
    owned: Mutex<Owned>,
}

impl SshSession {
    pub fn new(descriptor: ConnectionDescriptor, settings: TransportSettings) -> Self {
        Self {
            descriptor,
            settings,
            link: RwLock::new(None),
            owned: Mutex::new(Owned::default()),
        }
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// `user@host:port` of the target
    pub fn display_target(&self) -> String {
        self.descriptor.display_target()
    }

    /// Id of the active shell, if any
    pub fn session_id(&self) -> Option<String> {
        self.link.read().as_ref().map(|l| l.session_id.clone())
    }

    pub async fn send_ctrl_c(&self) -> Result<(), SshError> {
        self.send_raw(CTRL_C).await
    }

    pub async fn send_ctrl_d(&self) -> Result<(), SshError> {
        self.send_raw(CTRL_D).await
    }

    /// Open every hop and the shell, unwinding whatever was opened on failure
    async fn establish(
        &self,
        session_id: &str,
        sink: SharedSink,
        mode: FramingMode,
    ) -> Result<(ShellLink, Owned), SshError> {
        // resolved before any I/O so key-only without a key fails fast
        let plan = AuthPlan::resolve(&self.descriptor)?;
        debug!(
            "Auth plan for {}: key={}, password={}",
            self.descriptor.display_target(),
            plan.use_key,
            plan.use_password
        );

        let mut tunnel = match &self.descriptor.relay {
            Some(relay) => Some(
                JumpTunnel::open(
                    relay,
                    self.descriptor.private_key.as_deref(),
                    &self.descriptor.host,
                    self.descriptor.port,
                    plan,
                    &self.settings,
                )
                .await?,
            ),
            None => None,
        };

        let (host, port) = match &tunnel {
            Some(t) => {
                let (host, port) = t.local_endpoint();
                (host.to_string(), port)
            }
            None => (self.descriptor.host.clone(), self.descriptor.port),
        };

        let credentials = Credentials {
            username: &self.descriptor.username,
            password: self.descriptor.password.as_deref(),
            private_key: self.descriptor.private_key.as_deref(),
        };

        let handle = match open_session(&host, port, credentials, plan, &self.settings).await {
            Ok(handle) => handle,
            Err(e) => {
                release(None, None, tunnel.take()).await;
                return Err(e);
            }
        };

        let controller = spawn_handle_owner_task(handle, session_id.to_string());

        let channel = match open_shell_channel(&controller, &self.settings).await {
            Ok(channel) => channel,
            Err(e) => {
                error!("Shell setup failed for session {}: {}", session_id, e);
                release(None, Some(&controller), tunnel.take()).await;
                return Err(e);
            }
        };

        info!(
            "Interactive shell started for session {} ({:?} mode)",
            session_id, mode
        );

        let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(256);
        let channel_open = Arc::new(AtomicBool::new(true));
        let reader = spawn_shell_reader(
            channel,
            cmd_rx,
            StreamFramer::new(mode),
            sink,
            channel_open.clone(),
            session_id.to_string(),
        );

        Ok((
            ShellLink {
                session_id: session_id.to_string(),
                controller,
                cmd_tx,
                channel_open,
            },
            Owned {
                reader: Some(reader),
                tunnel,
            },
        ))
    }

    fn current_link(&self) -> Result<ShellLink, SshError> {
        self.link
            .read()
            .as_ref()
            .filter(|l| l.is_alive())
            .cloned()
            .ok_or(SshError::NotConnected)
    }
}

#[async_trait]
impl Transport for SshSession {
    async fn connect(&self, sink: SharedSink, mode: FramingMode) -> Result<(), SshError> {
        // one active shell per session
        self.disconnect().await;

        let session_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Connecting session {} to {}{}",
            session_id,
            self.descriptor.display_target(),
            self.descriptor
                .relay
                .as_ref()
                .map(|r| format!(" via {}:{}", r.host, r.port))
                .unwrap_or_default()
        );

        let mut owned_guard = self.owned.lock().await;
        let (link, owned) = self.establish(&session_id, sink, mode).await?;
        *owned_guard = owned;
        *self.link.write() = Some(link);

        info!("Session {} connected", session_id);
        Ok(())
    }

    async fn send_command(&self, command: &str) -> Result<(), SshError> {
        self.send_raw(&command_line(command)).await
    }

    async fn send_raw(&self, text: &str) -> Result<(), SshError> {
        let link = self.current_link()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        link.cmd_tx
            .send(SessionCommand::Data {
                bytes: text.as_bytes().to_vec(),
                reply_tx,
            })
            .await
            .map_err(|_| SshError::NotConnected)?;
        reply_rx.await.map_err(|_| SshError::Disconnected)?
    }

    fn is_connected(&self) -> bool {
        self.link.read().as_ref().is_some_and(|l| l.is_alive())
    }

    async fn resize(
        &self,
        cols: u32,
        rows: u32,
        pixel_width: u32,
        pixel_height: u32,
    ) -> Result<(), SshError> {
        if cols == 0 || rows == 0 {
            debug!("Ignoring zero-sized resize {}x{}", cols, rows);
            return Ok(());
        }
        let link = self.current_link()?;
        link.cmd_tx
            .send(SessionCommand::Resize {
                cols,
                rows,
                pixel_width,
                pixel_height,
            })
            .await
            .map_err(|_| SshError::NotConnected)
    }

    async fn disconnect(&self) {
        let link = self.link.write().take();
        let Owned { reader, tunnel } = std::mem::take(&mut *self.owned.lock().await);

        let Some(link) = link else {
            if let Some(reader) = reader {
                reader.abort();
            }
            release(None, None, tunnel).await;
            return;
        };

        info!("Disconnecting session {}", link.session_id);
        let shell = reader.map(|r| (link.cmd_tx.clone(), r));
        release(shell, Some(&link.controller), tunnel).await;
        info!("Session {} disconnected", link.session_id);
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            debug!("Dropping SshSession {} with a live shell", link.session_id);
            let _ = link.cmd_tx.try_send(SessionCommand::Close);
        }
    }
}

/// Tear down in order: shell channel, forward, target session, relay session
async fn release(
    shell: Option<(mpsc::Sender<SessionCommand>, JoinHandle<()>)>,
    controller: Option<&HandleController>,
    mut tunnel: Option<JumpTunnel>,
) {
    if let Some((cmd_tx, reader)) = shell {
        let _ = cmd_tx.send(SessionCommand::Close).await;
        if let Err(e) = reader.await {
            warn!("Shell reader ended abnormally: {}", e);
        }
    }

    if let Some(t) = tunnel.as_mut() {
        t.remove_forwarding().await;
    }

    if let Some(c) = controller {
        c.disconnect().await;
    }

    if let Some(t) = tunnel {
        t.close().await;
    }
}

async fn open_shell_channel(
    controller: &HandleController,
    settings: &TransportSettings,
) -> Result<Channel<Msg>, SshError> {
    let channel = controller.open_session_channel().await?;

    channel
        .request_pty(false, &settings.term, settings.cols, settings.rows, 0, 0, &[])
        .await
        .map_err(|e| SshError::ChannelError(format!("PTY request failed: {}", e)))?;

    debug!("PTY allocated, requesting shell");

    channel
        .request_shell(false)
        .await
        .map_err(|e| SshError::ChannelError(format!("Shell request failed: {}", e)))?;

    Ok(channel)
}

/// Drive the shell channel: writes and resizes in, framed output out.
///
/// Output is drained before commands are served; once no message is
/// immediately pending the framer gets an idle flush.
fn spawn_shell_reader(
    mut channel: Channel<Msg>,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    mut framer: StreamFramer,
    sink: SharedSink,
    channel_open: Arc<AtomicBool>,
    session_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Shell reader started for session {}", session_id);
        let mut idle_pending = false;

        loop {
            tokio::select! {
                biased;

                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) => {
                        framer.feed(&data, sink.as_ref());
                        idle_pending = true;
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        if ext == 1 {
                            framer.feed(&data, sink.as_ref());
                            idle_pending = true;
                        }
                    }
                    Some(ChannelMsg::Eof) => {
                        info!("SSH channel EOF for session {}", session_id);
                        break;
                    }
                    Some(ChannelMsg::Close) | None => {
                        info!("SSH channel closed for session {}", session_id);
                        break;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        info!("Shell exit status {} for session {}", exit_status, session_id);
                    }
                    Some(_) => {}
                },

                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCommand::Data { bytes, reply_tx }) => {
                        let result = channel
                            .data(&bytes[..])
                            .await
                            .map_err(|e| SshError::ChannelError(format!("Write failed: {}", e)));
                        let failed = result.is_err();
                        let _ = reply_tx.send(result);
                        if failed {
                            error!("Failed to write to shell for session {}", session_id);
                            break;
                        }
                    }
                    Some(SessionCommand::Resize { cols, rows, pixel_width, pixel_height }) => {
                        match channel.window_change(cols, rows, pixel_width, pixel_height).await {
                            Ok(()) => debug!("PTY resized to {}x{} for session {}", cols, rows, session_id),
                            Err(e) => warn!("Failed to resize PTY: {}", e),
                        }
                    }
                    Some(SessionCommand::Close) | None => {
                        debug!("Close requested for session {}", session_id);
                        let _ = channel.eof().await;
                        let _ = channel.close().await;
                        break;
                    }
                },

                _ = std::future::ready(()), if idle_pending => {
                    framer.idle(sink.as_ref());
                    idle_pending = false;
                }
            }
        }

        channel_open.store(false, Ordering::Release);
        framer.finish(sink.as_ref());
        cmd_rx.close();
        while let Ok(cmd) = cmd_rx.try_recv() {
            if let SessionCommand::Data { reply_tx, .. } = cmd {
                let _ = reply_tx.send(Err(SshError::Disconnected));
            }
        }
        info!("Shell reader terminated for session {}", session_id);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CapturedOutput;
    use crate::ssh::config::AuthMode;

    fn settings() -> TransportSettings {
        TransportSettings {
            connect_timeout: std::time::Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_key_only_without_key_fails_before_io() {
        // unroutable host: any network attempt would show up as a
        // connection error or timeout instead of a config error
        let descriptor =
            ConnectionDescriptor::with_password("203.0.113.1", 22, "u", "p").auth_mode(AuthMode::KeyOnly);
        let session = SshSession::new(descriptor, settings());

        let result = session
            .connect(Arc::new(CapturedOutput::new()), FramingMode::Interactive)
            .await;

        assert!(matches!(result, Err(SshError::Config(_))));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_sends_fail_when_not_connected() {
        let session = SshSession::new(
            ConnectionDescriptor::with_password("test", 22, "u", "p"),
            settings(),
        );

        assert!(matches!(
            session.send_command("ls").await,
            Err(SshError::NotConnected)
        ));
        assert!(matches!(
            session.send_ctrl_c().await,
            Err(SshError::NotConnected)
        ));
        assert!(session.session_id().is_none());
    }

    #[tokio::test]
    async fn test_zero_resize_is_ignored_even_when_disconnected() {
        let session = SshSession::new(
            ConnectionDescriptor::with_password("test", 22, "u", "p"),
            settings(),
        );
        assert!(session.resize(0, 24, 0, 0).await.is_ok());
        assert!(session.resize(80, 24, 0, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_on_fresh_session() {
        let session = SshSession::new(
            ConnectionDescriptor::with_password("test", 22, "u", "p"),
            settings(),
        );
        session.disconnect().await;
        session.disconnect().await;
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_nothing_behind() {
        // bind then drop to get a local port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let session = SshSession::new(
            ConnectionDescriptor::with_password("127.0.0.1", port, "u", "p"),
            settings(),
        );

        let result = session
            .connect(Arc::new(CapturedOutput::new()), FramingMode::Scripted)
            .await;

        assert!(result.is_err());
        assert!(!session.is_connected());
        assert!(session.session_id().is_none());
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_release_closes_reader_before_controller() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<SessionCommand>(4);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let reader_order = order.clone();
        let reader = tokio::spawn(async move {
            if let Some(SessionCommand::Close) = cmd_rx.recv().await {
                reader_order.lock().push("shell");
            }
        });

        let (handle_tx, mut handle_rx) = mpsc::channel(4);
        let controller = HandleController::new(handle_tx);
        let owner_order = order.clone();
        tokio::spawn(async move {
            if let Some(crate::ssh::HandleCommand::Disconnect { done_tx }) = handle_rx.recv().await {
                owner_order.lock().push("target");
                let _ = done_tx.send(());
            }
        });

        release(Some((cmd_tx, reader)), Some(&controller), None).await;

        assert_eq!(*order.lock(), vec!["shell", "target"]);
    }

    type Order = Arc<parking_lot::Mutex<Vec<&'static str>>>;

    /// Owner that records `label` on disconnect; when `forward_port` is set it
    /// first records whether that port still accepted connections.
    fn recording_owner(
        label: &'static str,
        order: Order,
        forward_port: Arc<parking_lot::Mutex<Option<u16>>>,
    ) -> HandleController {
        let (handle_tx, mut handle_rx) = mpsc::channel(8);
        tokio::spawn(async move {
            while let Some(cmd) = handle_rx.recv().await {
                if let crate::ssh::HandleCommand::Disconnect { done_tx } = cmd {
                    let port = *forward_port.lock();
                    if let Some(port) = port {
                        let open = tokio::net::TcpStream::connect(("127.0.0.1", port))
                            .await
                            .is_ok();
                        order
                            .lock()
                            .push(if open { "forward-open" } else { "forward-closed" });
                    }
                    order.lock().push(label);
                    let _ = done_tx.send(());
                    break;
                }
            }
        });
        HandleController::new(handle_tx)
    }

    #[tokio::test]
    async fn test_release_full_teardown_order_with_relay() {
        let order: Order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<SessionCommand>(4);
        let reader_order = order.clone();
        let reader = tokio::spawn(async move {
            if let Some(SessionCommand::Close) = cmd_rx.recv().await {
                reader_order.lock().push("shell");
            }
        });

        let watched_port = Arc::new(parking_lot::Mutex::new(None));
        let target = recording_owner("target", order.clone(), watched_port.clone());
        let relay = recording_owner(
            "relay",
            order.clone(),
            Arc::new(parking_lot::Mutex::new(None)),
        );

        let forward = crate::forwarding::start_local_forward(
            relay.clone(),
            crate::forwarding::LocalForward::ephemeral("10.0.0.5", 22),
        )
        .await
        .unwrap();
        let tunnel = JumpTunnel::from_parts(relay, forward, "jump@bastion:22");
        *watched_port.lock() = Some(tunnel.local_endpoint().1);

        release(Some((cmd_tx, reader)), Some(&target), Some(tunnel)).await;

        assert_eq!(
            *order.lock(),
            vec!["shell", "forward-closed", "target", "relay"]
        );
    }

    /// Accept connections on a local port and count them, closing each at once
    async fn counting_listener() -> (u16, Arc<std::sync::atomic::AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });
        (port, hits)
    }

    #[tokio::test]
    async fn test_without_relay_dials_target_directly() {
        let (target_port, target_hits) = counting_listener().await;
        let session = SshSession::new(
            ConnectionDescriptor::with_password("127.0.0.1", target_port, "u", "p"),
            settings(),
        );

        // the fake target hangs up during the handshake
        assert!(session
            .connect(Arc::new(CapturedOutput::new()), FramingMode::Scripted)
            .await
            .is_err());

        assert_eq!(target_hits.load(Ordering::SeqCst), 1);
        assert!(session.owned.lock().await.tunnel.is_none());
    }

    #[tokio::test]
    async fn test_with_relay_dials_relay_first() {
        let (target_port, target_hits) = counting_listener().await;
        let (relay_port, relay_hits) = counting_listener().await;
        let session = SshSession::new(
            ConnectionDescriptor::with_password("127.0.0.1", target_port, "u", "p").relay(
                crate::ssh::RelayConfig::new("127.0.0.1", relay_port, "jump", Some("jp".into())),
            ),
            settings(),
        );

        assert!(session
            .connect(Arc::new(CapturedOutput::new()), FramingMode::Scripted)
            .await
            .is_err());

        assert_eq!(relay_hits.load(Ordering::SeqCst), 1);
        assert_eq!(target_hits.load(Ordering::SeqCst), 0);
    }
}
