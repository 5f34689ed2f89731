//! edscript – a supervised scripting interpreter for an editor host
//!
//! This crate provides both sides of an editor's embedded scripting console:
//! - The interpreter process: an interactive loop over a small scripting
//!   language, with host operations bound into its namespace
//! - A framed, versioned RPC channel from the interpreter back to the host
//! - Host-side supervision: spawning, stdio bridging, interrupt/terminate
//!   signalling and automatic restart with a fresh session

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// RPC client used by the interpreter process
pub mod client;
/// Host-side process management
pub mod host;
/// Cooperative interruption flag
pub mod interrupt;
/// Wire types and framing
pub mod protocol;
/// Interactive loop
pub mod repl;
/// Scripting language
pub mod script;
/// Host-side RPC server
pub mod service;

pub use client::{HostApi, RpcClient, RpcError};
pub use host::{HostConfig, Supervisor, SupervisorEvent};
pub use interrupt::InterruptFlag;
pub use service::RpcServer;

/// Current version of edscript
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
