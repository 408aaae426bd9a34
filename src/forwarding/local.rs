//! Loopback port forwarding
//!
//! Binds a local port and bridges every accepted connection into a
//! direct-tcpip channel of an SSH session. The jump tunnel uses an ephemeral
//! port on 127.0.0.1 forwarded to the real target.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ssh::{HandleController, SshError};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Where a forward listens and what it reaches
#[derive(Debug, Clone)]
pub struct LocalForward {
    /// Bind address, e.g. "127.0.0.1:0"
    pub local_addr: String,
    /// Resolved on the remote side
    pub remote_host: String,
    pub remote_port: u16,
}

impl LocalForward {
    pub fn new(
        local_addr: impl Into<String>,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Self {
        Self {
            local_addr: local_addr.into(),
            remote_host: remote_host.into(),
            remote_port,
        }
    }

    /// Forward from an ephemeral loopback port
    pub fn ephemeral(remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self::new("127.0.0.1:0", remote_host, remote_port)
    }

    fn target(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }
}

/// A running forward. Dropping it aborts the listener.
pub struct LocalForwardHandle {
    pub config: LocalForward,
    /// Bound address; the port is real even when 0 was requested
    pub bound_addr: SocketAddr,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LocalForwardHandle {
    /// Close the listener and wait until the port is released.
    ///
    /// Connections already bridged are left to finish on their own.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        info!("Removing port forward {} -> {}", self.bound_addr, self.config.target());
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Err(e) = task.await {
            warn!("Forward listener {} ended abnormally: {}", self.bound_addr, e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for LocalForwardHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("Aborting forward listener {} on drop", self.bound_addr);
            task.abort();
        }
    }
}

/// Start forwarding; the listener also stops when the SSH connection behind
/// `controller` goes away.
pub async fn start_local_forward(
    controller: HandleController,
    config: LocalForward,
) -> Result<LocalForwardHandle, SshError> {
    let disconnect_rx = controller.subscribe_disconnect();
    start_local_forward_with_disconnect(controller, config, disconnect_rx).await
}

/// Start forwarding with an explicit disconnect signal
pub async fn start_local_forward_with_disconnect(
    controller: HandleController,
    config: LocalForward,
    disconnect_rx: broadcast::Receiver<()>,
) -> Result<LocalForwardHandle, SshError> {
    let listener = TcpListener::bind(&config.local_addr)
        .await
        .map_err(|e| bind_error(&config.local_addr, e))?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| SshError::ConnectionFailed(format!("Failed to get bound address: {}", e)))?;

    info!("Forwarding {} -> {}", bound_addr, config.target());

    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(accept_loop(
        listener,
        controller,
        config.clone(),
        stop_rx,
        disconnect_rx,
    ));

    Ok(LocalForwardHandle {
        config,
        bound_addr,
        stop_tx: Some(stop_tx),
        task: Some(task),
    })
}

fn bind_error(addr: &str, e: std::io::Error) -> SshError {
    let reason = match e.kind() {
        std::io::ErrorKind::AddrInUse => "address in use".to_string(),
        std::io::ErrorKind::PermissionDenied => "permission denied".to_string(),
        _ => e.to_string(),
    };
    SshError::ConnectionFailed(format!("Cannot bind {}: {}", addr, reason))
}

async fn accept_loop(
    listener: TcpListener,
    controller: HandleController,
    config: LocalForward,
    mut stop_rx: oneshot::Receiver<()>,
    mut disconnect_rx: broadcast::Receiver<()>,
) {
    let bound = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                debug!("Forward listener {} stopped by request", bound);
                break;
            }
            _ = disconnect_rx.recv() => {
                info!("Forward listener {} stopped: SSH disconnected", bound);
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Forward {} accepted {}", bound, peer);
                    let controller = controller.clone();
                    let config = config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge(controller, stream, &config).await {
                            warn!("Forward to {} failed: {}", config.target(), e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Forward listener {} accept error: {}", bound, e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    // listener dropped here, port released
}

/// Pipe one local connection through a fresh direct-tcpip channel
async fn bridge(
    controller: HandleController,
    mut local: TcpStream,
    config: &LocalForward,
) -> Result<(), SshError> {
    if let Err(e) = local.set_nodelay(true) {
        debug!("TCP_NODELAY not set: {}", e);
    }

    let channel = controller
        .open_direct_tcpip(&config.remote_host, config.remote_port as u32, "127.0.0.1", 0)
        .await?;
    let mut remote = channel.into_stream();

    match tokio::io::copy_bidirectional(&mut local, &mut remote).await {
        Ok((sent, received)) => {
            debug!(
                "Forward to {} closed ({} bytes out, {} bytes in)",
                config.target(),
                sent,
                received
            );
            Ok(())
        }
        Err(e) => Err(SshError::IoError(e)),
    }
}
