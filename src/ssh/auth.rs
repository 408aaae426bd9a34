//! Authentication plan and credential offering
//!
//! The plan is resolved once from the descriptor, without any I/O, and the
//! same plan is applied to the relay hop and to the target host.

use std::sync::Arc;

use russh::client::Handle;
use russh::keys::key::PrivateKeyWithHashAlg;
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::config::{AuthMode, ConnectionDescriptor};
use super::error::SshError;

/// Which credentials to offer, in order: key first, then password
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPlan {
    pub use_key: bool,
    pub use_password: bool,
}

impl AuthPlan {
    /// Resolve the plan for a descriptor.
    ///
    /// Fails with [`SshError::Config`] when `key_only` is requested without key
    /// material, so callers never reach the network in that case.
    pub fn resolve(descriptor: &ConnectionDescriptor) -> Result<Self, SshError> {
        let key_present = descriptor.has_private_key();

        if descriptor.auth_mode == AuthMode::KeyOnly && !key_present {
            return Err(SshError::Config(
                "Key-only authentication selected but no private key is stored".to_string(),
            ));
        }

        Ok(Self {
            use_key: (descriptor.auth_mode == AuthMode::Auto && key_present)
                || descriptor.auth_mode == AuthMode::KeyOnly,
            use_password: descriptor.auth_mode != AuthMode::KeyOnly,
        })
    }
}

/// Credentials for one hop
#[derive(Clone, Copy)]
pub(crate) struct Credentials<'a> {
    pub username: &'a str,
    pub password: Option<&'a str>,
    pub private_key: Option<&'a str>,
}

impl std::fmt::Debug for Credentials<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.map(|_| "***"))
            .field("private_key", &self.private_key.map(|_| "***"))
            .finish()
    }
}

/// Decode PEM/OpenSSH key text into a russh private key
pub(crate) fn decode_private_key(pem: &str) -> Result<russh::keys::PrivateKey, SshError> {
    russh::keys::decode_secret_key(pem.trim(), None)
        .map_err(|e| SshError::KeyError(format!("Failed to parse private key: {}", e)))
}

/// Offer credentials according to `plan` until the server accepts one
pub(crate) async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    host: &str,
    credentials: Credentials<'_>,
    plan: AuthPlan,
) -> Result<(), SshError> {
    if plan.use_key {
        if let Some(pem) = credentials.private_key.filter(|k| !k.trim().is_empty()) {
            match decode_private_key(pem) {
                Ok(key) => {
                    info!("Authenticating to {} with private key", host);
                    let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);
                    let result = handle
                        .authenticate_publickey(credentials.username, key_with_hash)
                        .await
                        .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;
                    if result.success() {
                        return Ok(());
                    }
                    debug!("Public key rejected by {}", host);
                }
                Err(e) if !plan.use_password => return Err(e),
                Err(e) => warn!("Skipping unusable private key for {}: {}", host, e),
            }
        }
    }

    if plan.use_password {
        if let Some(password) = credentials.password.filter(|p| !p.is_empty()) {
            info!("Authenticating to {} with password", host);
            let result = handle
                .authenticate_password(credentials.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;
            if result.success() {
                return Ok(());
            }
        }
    }

    Err(SshError::AuthenticationFailed(format!(
        "Authentication to {} rejected",
        host
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_without_key_uses_password_only() {
        let descriptor = ConnectionDescriptor::with_password("test", 22, "u", "p");
        let plan = AuthPlan::resolve(&descriptor).unwrap();
        assert_eq!(
            plan,
            AuthPlan {
                use_key: false,
                use_password: true
            }
        );
    }

    #[test]
    fn test_auto_with_key_offers_both() {
        let descriptor =
            ConnectionDescriptor::with_password("test", 22, "u", "p").private_key("-----BEGIN");
        let plan = AuthPlan::resolve(&descriptor).unwrap();
        assert!(plan.use_key);
        assert!(plan.use_password);
    }

    #[test]
    fn test_password_only_ignores_key() {
        let descriptor = ConnectionDescriptor::with_password("test", 22, "u", "p")
            .private_key("-----BEGIN")
            .auth_mode(AuthMode::PasswordOnly);
        let plan = AuthPlan::resolve(&descriptor).unwrap();
        assert!(!plan.use_key);
        assert!(plan.use_password);
    }

    #[test]
    fn test_key_only_requires_key() {
        let descriptor =
            ConnectionDescriptor::with_password("test", 22, "u", "p").auth_mode(AuthMode::KeyOnly);
        assert!(matches!(
            AuthPlan::resolve(&descriptor),
            Err(SshError::Config(_))
        ));

        let blank = descriptor.clone().private_key("   ");
        assert!(matches!(AuthPlan::resolve(&blank), Err(SshError::Config(_))));
    }

    #[test]
    fn test_key_only_with_key_never_uses_password() {
        let descriptor = ConnectionDescriptor::with_password("test", 22, "u", "p")
            .private_key("-----BEGIN")
            .auth_mode(AuthMode::KeyOnly);
        let plan = AuthPlan::resolve(&descriptor).unwrap();
        assert!(plan.use_key);
        assert!(!plan.use_password);
    }

    #[test]
    fn test_invalid_key_text_is_key_error() {
        assert!(matches!(
            decode_private_key("not a key"),
            Err(SshError::KeyError(_))
        ));
    }

    #[test]
    fn test_credentials_debug_masks_secrets() {
        let credentials = Credentials {
            username: "u",
            password: Some("hunter2"),
            private_key: Some("PRIVATE"),
        };
        let rendered = format!("{:?}", credentials);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("PRIVATE"));
    }
}
