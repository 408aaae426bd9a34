//! Session Layer
//!
//! Everything between a live shell channel and its consumer:
//! - Output sinks (the single in-order callback)
//! - Stream framing (raw chunks or discrete lines)
//! - Connection supervision with retry and drop detection

mod framer;
mod input_gate;
mod sink;
mod supervisor;

pub use framer::{FramingMode, StreamFramer};
pub use input_gate::InputGate;
pub use sink::{CapturedOutput, OutputSink, SharedSink, StreamUnit};
pub use supervisor::{ConnectionState, ConnectionSupervisor, SupervisorConfig, SupervisorEvent};
