//! SSH module - handles SSH connections and sessions
//!
//! This module provides the transport core using the russh library.
//!
//! # Features
//! - Direct SSH connections with key and/or password authentication
//! - Jump tunnel through one relay host (local forward on 127.0.0.1)
//! - Keepalive-based liveness shared by relay and target
//! - PTY shell channel with line or raw output framing

mod auth;
mod client;
mod config;
mod error;
mod handle_owner;
mod session;
mod transport;
mod tunnel;

pub use auth::AuthPlan;
pub use client::ClientHandler;
pub use config::{AuthMode, ConnectionDescriptor, RelayConfig, TransportSettings};
pub use error::{OperationResult, SshError, GENERIC_CONNECT_FAILURE};
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use session::SshSession;
pub use transport::{command_line, SshTransportFactory, Transport, TransportFactory};
pub use tunnel::{JumpTunnel, TUNNEL_LOCAL_HOST};
