//! Transport seam between the session core and its drivers
//!
//! The reconnection supervisor and the play runner only talk to this trait,
//! so they can run against [`SshSession`](super::SshSession) or a fake.

use async_trait::async_trait;

use super::config::{ConnectionDescriptor, TransportSettings};
use super::error::SshError;
use super::session::SshSession;
use crate::session::{FramingMode, SharedSink};

/// One duplex shell session to a remote host
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the session and start delivering output to `sink`.
    ///
    /// `mode` is fixed for the lifetime of the session.
    async fn connect(&self, sink: SharedSink, mode: FramingMode) -> Result<(), SshError>;

    /// Send a command line; a trailing newline is added when missing
    async fn send_command(&self, command: &str) -> Result<(), SshError>;

    /// Send text exactly as given
    async fn send_raw(&self, text: &str) -> Result<(), SshError>;

    /// Non-blocking liveness of both the transport and the shell channel
    fn is_connected(&self) -> bool;

    /// Request a PTY resize; zero-sized requests are ignored
    async fn resize(
        &self,
        cols: u32,
        rows: u32,
        pixel_width: u32,
        pixel_height: u32,
    ) -> Result<(), SshError>;

    /// Release everything; safe to call at any time, any number of times
    async fn disconnect(&self);
}

/// Builds a fresh transport per connection attempt
pub trait TransportFactory: Send + Sync {
    type Transport: Transport + 'static;

    fn create(&self, descriptor: &ConnectionDescriptor) -> Self::Transport;
}

/// Factory for real SSH sessions
#[derive(Debug, Clone, Default)]
pub struct SshTransportFactory {
    settings: TransportSettings,
}

impl SshTransportFactory {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }
}

impl TransportFactory for SshTransportFactory {
    type Transport = SshSession;

    fn create(&self, descriptor: &ConnectionDescriptor) -> SshSession {
        SshSession::new(descriptor.clone(), self.settings.clone())
    }
}

/// Append the line terminator a shell needs to run `command`
pub fn command_line(command: &str) -> String {
    if command.ends_with('\n') {
        command.to_string()
    } else {
        format!("{}\n", command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_appends_newline_once() {
        assert_eq!(command_line("ls -la"), "ls -la\n");
        assert_eq!(command_line("ls -la\n"), "ls -la\n");
        assert_eq!(command_line(""), "\n");
    }

    #[test]
    fn test_factory_builds_disconnected_session() {
        let factory = SshTransportFactory::default();
        let session = factory.create(&ConnectionDescriptor::with_password("test", 22, "u", "p"));
        assert!(!session.is_connected());
        assert_eq!(session.descriptor().display_target(), "u@test:22");
    }
}
