//! Handle Owner Task
//!
//! Only one task owns the `Handle<ClientHandler>`. Everything else talks to it
//! through a cloneable [`HandleController`], which keeps `Handle` access off
//! shared locks and lets liveness be read without touching the network.
//!
//! ```ignore
//! let controller = spawn_handle_owner_task(handle, session_id);
//! let channel = controller.open_session_channel().await?;
//! assert!(controller.is_connected());
//! controller.disconnect().await;
//! ```

use std::time::Duration;

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// How often the owner task checks whether russh closed the connection
const LIVENESS_POLL: Duration = Duration::from_millis(500);

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (for PTY/shell)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Open a direct-tcpip channel (for the jump tunnel)
    ChannelOpenDirectTcpip {
        host: String,
        port: u32,
        originator_host: String,
        originator_port: u32,
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection; `done_tx` fires once the transport is closed
    Disconnect { done_tx: oneshot::Sender<()> },
}

/// Controller for sending commands to the Handle Owner Task
///
/// Cloning is cheap (a channel sender). Any holder has full control over the
/// connection, so controllers stay inside the session that created them.
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    /// Fires when the owner task exits, for tasks bound to this connection
    disconnect_tx: broadcast::Sender<()>,
}

impl HandleController {
    /// Create a controller around an existing command sender.
    ///
    /// Used by tests to stand in for a live connection.
    pub fn new(cmd_tx: mpsc::Sender<HandleCommand>) -> Self {
        let (disconnect_tx, _) = broadcast::channel(1);
        Self {
            cmd_tx,
            disconnect_tx,
        }
    }

    /// Subscribe to disconnect notifications, for use in `tokio::select!`.
    pub fn subscribe_disconnect(&self) -> broadcast::Receiver<()> {
        self.disconnect_tx.subscribe()
    }

    /// Open a session channel (for PTY/shell)
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    /// Open a direct-tcpip channel to `host:port` as seen from the remote side
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        originator_host: &str,
        originator_port: u32,
    ) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenDirectTcpip {
                host: host.to_string(),
                port,
                originator_host: originator_host.to_string(),
                originator_port,
                reply_tx,
            })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    /// Disconnect and wait until the transport is torn down.
    ///
    /// Safe to call repeatedly and on an already dead connection.
    pub async fn disconnect(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(HandleCommand::Disconnect { done_tx })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }

    /// Non-blocking liveness: false once the owner task has exited
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes the Handle. The task exits on `Disconnect`, when every controller
/// is dropped, or when russh reports the connection closed (e.g. keepalive
/// probes went unanswered).
pub fn spawn_handle_owner_task(
    handle: Handle<ClientHandler>,
    session_id: String,
) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let (disconnect_tx, _) = broadcast::channel::<()>(1);
    let disconnect_tx_clone = disconnect_tx.clone();

    tokio::spawn(async move {
        let handle = handle;
        let mut liveness = tokio::time::interval(LIVENESS_POLL);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut done_waiters: Vec<oneshot::Sender<()>> = Vec::new();

        info!("Handle owner task started for session {}", session_id);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(HandleCommand::ChannelOpenSession { reply_tx }) => {
                        let result = handle.channel_open_session().await;
                        if reply_tx.send(result).is_err() {
                            warn!("Caller dropped before receiving channel_open_session result");
                        }
                    }
                    Some(HandleCommand::ChannelOpenDirectTcpip {
                        host,
                        port,
                        originator_host,
                        originator_port,
                        reply_tx,
                    }) => {
                        let result = handle
                            .channel_open_direct_tcpip(&host, port, &originator_host, originator_port)
                            .await;
                        if reply_tx.send(result).is_err() {
                            warn!("Caller dropped before receiving direct_tcpip result");
                        }
                    }
                    Some(HandleCommand::Disconnect { done_tx }) => {
                        info!("Disconnect requested for session {}", session_id);
                        done_waiters.push(done_tx);
                        break;
                    }
                    None => {
                        info!("All controllers dropped for session {}", session_id);
                        break;
                    }
                },
                _ = liveness.tick() => {
                    if handle.is_closed() {
                        warn!("Transport closed underneath session {}", session_id);
                        break;
                    }
                }
            }
        }

        let _ = disconnect_tx_clone.send(());
        drain_pending_commands(&mut cmd_rx, &mut done_waiters);

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;
        debug!("Transport for session {} closed", session_id);

        for done_tx in done_waiters {
            let _ = done_tx.send(());
        }
        info!("Handle owner task terminated for session {}", session_id);
    });

    HandleController {
        cmd_tx,
        disconnect_tx,
    }
}

/// Reject everything still queued; collect disconnect waiters
fn drain_pending_commands(
    cmd_rx: &mut mpsc::Receiver<HandleCommand>,
    done_waiters: &mut Vec<oneshot::Sender<()>>,
) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::ChannelOpenDirectTcpip { reply_tx, .. } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect { done_tx } => done_waiters.push(done_tx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_controller_reports_closed_owner() {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let controller = HandleController::new(cmd_tx);
        assert!(controller.is_connected());

        drop(cmd_rx);
        assert!(!controller.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_waits_for_owner_ack() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let controller = HandleController::new(cmd_tx);

        let owner = tokio::spawn(async move {
            match cmd_rx.recv().await {
                Some(HandleCommand::Disconnect { done_tx }) => {
                    let _ = done_tx.send(());
                    true
                }
                _ => false,
            }
        });

        controller.disconnect().await;
        assert!(owner.await.unwrap());
    }

    #[tokio::test]
    async fn test_disconnect_on_dead_owner_returns() {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let controller = HandleController::new(cmd_tx);
        drop(cmd_rx);

        controller.disconnect().await;
        controller.disconnect().await;
    }

    #[tokio::test]
    async fn test_channel_open_on_dead_owner_is_disconnected() {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let controller = HandleController::new(cmd_tx);
        drop(cmd_rx);

        assert!(matches!(
            controller.open_session_channel().await,
            Err(SshError::Disconnected)
        ));
    }

    #[test]
    fn test_drain_rejects_queued_commands() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let (reply_tx, mut reply_rx) = oneshot::channel();
        let (done_tx, _done_rx) = oneshot::channel();
        cmd_tx
            .try_send(HandleCommand::ChannelOpenSession { reply_tx })
            .ok();
        cmd_tx.try_send(HandleCommand::Disconnect { done_tx }).ok();

        let mut waiters = Vec::new();
        drain_pending_commands(&mut cmd_rx, &mut waiters);

        assert_eq!(waiters.len(), 1);
        assert!(matches!(reply_rx.try_recv(), Ok(Err(_))));
    }
}
