//! Host-side process management.
//!
//! The [`Supervisor`] owns the interpreter subprocess. It spawns a
//! [`ProcessHandle`], wires its standard streams through a [`StreamBridge`],
//! delivers signals through a [`SignalController`], and starts a replacement
//! whenever the process exits without an explicit shutdown. [`EditorState`]
//! is the minimal editor that executes host operations for the demo host and
//! the integration tests.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Interpreter standard stream wiring.
pub mod bridge;
/// Minimal editor state executing host operations.
pub mod editor;
/// Live interpreter process handle.
pub mod process;
/// Interrupt and terminate delivery.
pub mod signal;
/// Spawn, watch and restart the interpreter.
pub mod supervisor;

pub use bridge::StreamBridge;
pub use editor::{EditorState, Language};
pub use process::{InterpreterCommand, ProcessHandle};
pub use signal::SignalController;
pub use supervisor::{Supervisor, SupervisorEvent};

/// Environment variable selecting the interpreter's log filter.
pub const ENV_INTERPRETER_LOG: &str = "EDSCRIPT_LOG";

/// Errors raised by the host-side process machinery.
#[derive(Debug, Error)]
pub enum HostError {
    /// The interpreter could not be started.
    #[error("failed to spawn interpreter '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// No interpreter process is currently running.
    #[error("interpreter is not running")]
    NotRunning,

    /// The interpreter's standard input has been closed.
    #[error("interpreter input is closed")]
    InputClosed,

    /// Invalid host configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error on an interpreter stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Interpreter program followed by its arguments.
    pub interpreter_command: Vec<String>,

    /// Address the RPC server binds to.
    pub rpc_bind: String,

    /// Pause before a replacement interpreter is started.
    pub restart_delay_ms: u64,

    /// How often the supervisor checks whether the interpreter exited.
    pub poll_interval_ms: u64,

    /// Upper bound on a single coalesced output chunk, in bytes.
    pub output_chunk_limit: usize,

    /// Largest RPC frame body accepted.
    pub max_frame_len: usize,

    /// Log filter handed to the interpreter through `EDSCRIPT_LOG`.
    pub interpreter_log: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            interpreter_command: vec!["edscript-repl".to_string()],
            rpc_bind: "127.0.0.1:0".to_string(),
            restart_delay_ms: 250,
            poll_interval_ms: 20,
            output_chunk_limit: 1024,
            max_frame_len: crate::protocol::DEFAULT_MAX_FRAME_LEN,
            interpreter_log: None,
        }
    }
}

impl HostConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Restart pause as a duration.
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Exit polling interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// RPC server settings derived from this configuration.
    pub fn server_config(&self) -> crate::service::ServerConfig {
        crate::service::ServerConfig {
            bind: self.rpc_bind.clone(),
            max_frame_len: self.max_frame_len,
            ..Default::default()
        }
    }

    /// Interpreter command line with the log filter applied.
    pub fn interpreter(&self) -> Result<InterpreterCommand, HostError> {
        let mut command = InterpreterCommand::from_argv(&self.interpreter_command)?;
        if let Some(filter) = &self.interpreter_log {
            command = command.env(ENV_INTERPRETER_LOG, filter);
        }
        Ok(command)
    }
}
