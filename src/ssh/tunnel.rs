//! Jump tunnel through a relay host
//!
//! ```text
//! Client --SSH--> [Relay] --direct-tcpip--> [Target]
//!    ^                                         |
//!    +-- 127.0.0.1:<ephemeral> (local forward) +
//! ```
//!
//! The relay session binds an ephemeral loopback port that forwards to the
//! real target; the target session then connects to that port. The forward
//! lives strictly inside the relay session: it is removed first, and only
//! then is the relay disconnected.

use tracing::{info, warn};

use super::auth::{AuthPlan, Credentials};
use super::client::open_session;
use super::config::{RelayConfig, TransportSettings};
use super::error::SshError;
use super::handle_owner::{spawn_handle_owner_task, HandleController};
use crate::forwarding::{start_local_forward, LocalForward, LocalForwardHandle};

/// Loopback host the target session dials when tunnelled
pub const TUNNEL_LOCAL_HOST: &str = "127.0.0.1";

/// Relay session plus the local forward it owns
pub struct JumpTunnel {
    relay: HandleController,
    forward: Option<LocalForwardHandle>,
    local_port: u16,
    relay_label: String,
}

impl JumpTunnel {
    /// Connect to the relay and forward an ephemeral local port to
    /// `target_host:target_port`.
    ///
    /// The relay is authenticated with its own username/password and the
    /// session's key material, under the same plan as the target.
    pub(crate) async fn open(
        relay: &RelayConfig,
        private_key: Option<&str>,
        target_host: &str,
        target_port: u16,
        plan: AuthPlan,
        settings: &TransportSettings,
    ) -> Result<Self, SshError> {
        let relay_label = format!("{}@{}:{}", relay.username, relay.host, relay.port);
        info!("Opening relay session {}", relay_label);

        let credentials = Credentials {
            username: &relay.username,
            password: relay.password.as_deref(),
            private_key,
        };
        let handle = open_session(&relay.host, relay.port, credentials, plan, settings)
            .await
            .map_err(|e| relabel_relay_error(e, &relay_label))?;

        let session_id = format!("relay-{}", uuid::Uuid::new_v4());
        let controller = spawn_handle_owner_task(handle, session_id);

        match start_local_forward(
            controller.clone(),
            LocalForward::ephemeral(target_host, target_port),
        )
        .await
        {
            Ok(forward) => Ok(Self::from_parts(controller, forward, relay_label)),
            Err(e) => {
                warn!("Local forward through {} failed: {}", relay_label, e);
                controller.disconnect().await;
                Err(e)
            }
        }
    }

    /// Assemble a tunnel from an already running relay and forward
    pub fn from_parts(
        relay: HandleController,
        forward: LocalForwardHandle,
        relay_label: impl Into<String>,
    ) -> Self {
        Self {
            relay,
            local_port: forward.bound_addr.port(),
            forward: Some(forward),
            relay_label: relay_label.into(),
        }
    }

    /// Effective endpoint the target session must dial
    pub fn local_endpoint(&self) -> (&'static str, u16) {
        (TUNNEL_LOCAL_HOST, self.local_port)
    }

    pub fn is_relay_connected(&self) -> bool {
        self.relay.is_connected()
    }

    /// Tear down the port forward; the relay session stays up
    pub async fn remove_forwarding(&mut self) {
        if let Some(mut forward) = self.forward.take() {
            info!(
                "Removing forward 127.0.0.1:{} via {}",
                self.local_port, self.relay_label
            );
            forward.stop().await;
        }
    }

    /// Remove the forward, then disconnect the relay, in that order
    pub async fn close(mut self) {
        self.remove_forwarding().await;
        info!("Disconnecting relay {}", self.relay_label);
        self.relay.disconnect().await;
    }
}

fn relabel_relay_error(err: SshError, relay_label: &str) -> SshError {
    match err {
        SshError::ConnectionFailed(m) => {
            SshError::ConnectionFailed(format!("Relay {}: {}", relay_label, m))
        }
        SshError::AuthenticationFailed(m) => {
            SshError::AuthenticationFailed(format!("Relay {}: {}", relay_label, m))
        }
        SshError::Timeout(m) => SshError::Timeout(format!("Relay {}: {}", relay_label, m)),
        other => other,
    }
}
