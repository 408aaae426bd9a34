//! Port Forwarding Module
//!
//! Local port forwarding over an SSH connection, used by the jump tunnel to
//! expose the real target on a loopback port.

mod local;

pub use local::{
    start_local_forward, start_local_forward_with_disconnect, LocalForward, LocalForwardHandle,
};
