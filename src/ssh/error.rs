//! SSH Error types

use serde::Serialize;
use thiserror::Error;

/// Shown when an underlying failure carries no usable message.
pub const GENERIC_CONNECT_FAILURE: &str = "Unable to connect. Check host and credentials.";

#[derive(Error, Debug)]
pub enum SshError {
    /// Missing or inconsistent connection settings, detected before any I/O
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Disconnected")]
    Disconnected,
}

impl SshError {
    /// Human readable message for UI surfaces, never blank.
    pub fn user_message(&self) -> String {
        let message = match self {
            SshError::Config(m)
            | SshError::ConnectionFailed(m)
            | SshError::AuthenticationFailed(m)
            | SshError::ChannelError(m)
            | SshError::ProtocolError(m)
            | SshError::KeyError(m)
            | SshError::Timeout(m) => m.trim().to_string(),
            other => other.to_string(),
        };
        if message.is_empty() {
            GENERIC_CONNECT_FAILURE.to_string()
        } else {
            message
        }
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::ProtocolError(err.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::KeyError(err.to_string())
    }
}

// Serialized as a plain string for UI boundaries
impl Serialize for SshError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Structured `{success, message}` object handed to UI and log collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    /// Collapse an operation outcome, using `ok_message` on success.
    pub fn from_result<T>(result: &Result<T, SshError>, ok_message: &str) -> Self {
        match result {
            Ok(_) => Self::ok(ok_message),
            Err(e) => Self::failed(e.user_message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_message_falls_back() {
        let err = SshError::ConnectionFailed("   ".to_string());
        assert_eq!(err.user_message(), GENERIC_CONNECT_FAILURE);
    }

    #[test]
    fn test_user_message_strips_prefix() {
        let err = SshError::AuthenticationFailed("Permission denied".to_string());
        assert_eq!(err.user_message(), "Permission denied");
        assert_eq!(SshError::NotConnected.user_message(), "Not connected");
    }

    #[test]
    fn test_operation_result_from_result() {
        let ok: Result<(), SshError> = Ok(());
        assert_eq!(
            OperationResult::from_result(&ok, "Connected"),
            OperationResult::ok("Connected")
        );

        let failed: Result<(), SshError> = Err(SshError::Timeout("Connection timed out".into()));
        let result = OperationResult::from_result(&failed, "Connected");
        assert!(!result.success);
        assert_eq!(result.message, "Connection timed out");
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&SshError::Disconnected).unwrap();
        assert_eq!(json, "\"Disconnected\"");
    }
}
