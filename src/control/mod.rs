//! # Control Surface
//!
//! The remote face of the host: a TCP listener speaking newline-delimited
//! JSON, translating load/unload/list/heartbeat requests into registry
//! operations. The surface holds no component state; it validates, builds
//! remapping tables, wires liveness monitors, and forwards to the
//! [`Loader`](crate::loader::Loader).

mod protocol;
mod server;

pub use protocol::{resolve_name, ControlRequest, ControlResponse};
pub use server::{ControlServer, ControlServerError};
