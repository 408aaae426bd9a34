//! SSH Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which credentials may be offered to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Offer the key when one is stored, fall back to the password
    #[default]
    Auto,
    /// Never offer a key
    PasswordOnly,
    /// Only offer the key; a missing key is a configuration error
    KeyOnly,
}

/// Connection descriptor for one session attempt
///
/// Built by the caller per attempt and never mutated while a session is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Remote host address
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for authentication
    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Private key material, PEM/OpenSSH text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    #[serde(default)]
    pub auth_mode: AuthMode,

    /// Optional relay (jump host), already resolved by the host store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayConfig>,
}

/// Credentials of the intermediate relay host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ConnectionDescriptor {
    /// Password-authenticated descriptor with auto auth mode and no relay
    pub fn with_password(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: Some(password.into()),
            private_key: None,
            auth_mode: AuthMode::Auto,
            relay: None,
        }
    }

    pub fn auth_mode(mut self, mode: AuthMode) -> Self {
        self.auth_mode = mode;
        self
    }

    pub fn private_key(mut self, pem: impl Into<String>) -> Self {
        self.private_key = Some(pem.into());
        self
    }

    pub fn relay(mut self, relay: RelayConfig) -> Self {
        self.relay = Some(relay);
        self
    }

    /// `user@host:port`
    pub fn display_target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }
}

impl RelayConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password,
        }
    }
}

/// Transport tuning shared by the relay hop and the target session
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Handshake + authentication deadline per hop
    pub connect_timeout: Duration,
    /// Keepalive probe period
    pub keepalive_interval: Duration,
    /// Missed probes tolerated before the transport is declared dead
    pub keepalive_max: usize,
    /// TERM value requested with the PTY
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(15),
            keepalive_max: 3,
            term: "xterm".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

fn default_port() -> u16 {
    22
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_target() {
        let descriptor = ConnectionDescriptor::with_password("test", 22, "u", "p");
        assert_eq!(descriptor.display_target(), "u@test:22");
    }

    #[test]
    fn test_blank_key_is_not_a_key() {
        let descriptor = ConnectionDescriptor::with_password("h", 22, "u", "p").private_key("  \n");
        assert!(!descriptor.has_private_key());
    }

    #[test]
    fn test_deserialize_defaults() {
        let descriptor: ConnectionDescriptor =
            serde_json::from_str(r#"{"host":"example.com","username":"root"}"#).unwrap();
        assert_eq!(descriptor.port, 22);
        assert_eq!(descriptor.auth_mode, AuthMode::Auto);
        assert!(descriptor.password.is_none());
        assert!(descriptor.relay.is_none());
    }

    #[test]
    fn test_auth_mode_serde_names() {
        let mode: AuthMode = serde_json::from_str("\"key_only\"").unwrap();
        assert_eq!(mode, AuthMode::KeyOnly);
        assert_eq!(
            serde_json::to_string(&AuthMode::PasswordOnly).unwrap(),
            "\"password_only\""
        );
    }
}
