//! SSH Client implementation using russh

use std::sync::Arc;

use russh::client::{self, Handle};
use russh::keys::{HashAlg, PublicKey};
use tracing::{debug, info};

use super::auth::{authenticate, AuthPlan, Credentials};
use super::config::TransportSettings;
use super::error::SshError;

/// Client handler for russh callbacks
///
/// Unknown host keys are accepted; the fingerprint is logged so a changed key
/// can still be spotted in the session log.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "Accepting host key for {}:{} (fingerprint: {})",
            self.host,
            self.port,
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}

/// russh client config with the keepalive policy shared by every hop
pub(crate) fn client_config(settings: &TransportSettings) -> Arc<client::Config> {
    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(settings.keepalive_interval),
        keepalive_max: settings.keepalive_max,
        ..Default::default()
    })
}

/// Open and authenticate one SSH session to `host:port`
///
/// The whole handshake and authentication is bounded by
/// `settings.connect_timeout`. On authentication failure the half-open
/// connection is disconnected before the error is returned.
pub(crate) async fn open_session(
    host: &str,
    port: u16,
    credentials: Credentials<'_>,
    plan: AuthPlan,
    settings: &TransportSettings,
) -> Result<Handle<ClientHandler>, SshError> {
    let addr = format!("{}:{}", host, port);
    info!("Connecting to SSH server at {}", addr);

    let handler = ClientHandler::new(host.to_string(), port);

    let establish = async {
        let mut handle = client::connect(client_config(settings), (host, port), handler)
            .await
            .map_err(|e| SshError::ConnectionFailed(format!("{}: {}", addr, e.user_message())))?;

        debug!("SSH handshake with {} completed", addr);

        if let Err(e) = authenticate(&mut handle, host, credentials, plan).await {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "Authentication failed", "en")
                .await;
            return Err(e);
        }

        Ok(handle)
    };

    let handle = tokio::time::timeout(settings.connect_timeout, establish)
        .await
        .map_err(|_| SshError::Timeout(format!("Connection to {} timed out", addr)))??;

    info!("Authenticated to {} as {}", addr, credentials.username);
    Ok(handle)
}
