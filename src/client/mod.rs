//! Interpreter-side RPC client for host operations.
//!
//! The client is synchronous: [`RpcClient::call`] writes one request frame
//! and blocks the calling thread until the matching response frame arrives.
//! The wait polls the socket with a short read timeout so a raised
//! [`InterruptFlag`] abandons the call promptly; any response that arrives
//! afterwards is recognised by its stale id and discarded.

use crate::interrupt::InterruptFlag;
use crate::protocol::{
    CodecError, DEFAULT_MAX_FRAME_LEN, ENV_RPC_ADDR, ENV_RPC_KEY, FrameDecoder, OpResult,
    OperationError, Request, RequestEnvelope, ResponseEnvelope, encode_frame,
};
use serde_json::Value;
use std::env;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the [`RpcClient`].
#[derive(Debug, Error)]
pub enum RpcError {
    /// The host reported a structured failure for the operation.
    #[error("{0}")]
    Operation(OperationError),

    /// The channel ended or delivered garbage before a response arrived.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// I/O error while talking to the host.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The request could not be serialised.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The wait for a response was abandoned because of an interrupt.
    #[error("call interrupted")]
    Interrupted,

    /// No host endpoint is known to this process.
    #[error("host RPC endpoint not configured (set {ENV_RPC_ADDR} and {ENV_RPC_KEY})")]
    NotConfigured,
}

/// Connection settings for the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host RPC server address.
    pub addr: String,
    /// API key issued by the host.
    pub api_key: String,
    /// Largest response body accepted.
    pub max_frame_len: usize,
    /// Socket read timeout used between interrupt checks.
    pub poll_interval: Duration,
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Settings for a known endpoint with default limits.
    pub fn new(addr: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            api_key: api_key.into(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            poll_interval: Duration::from_millis(20),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Read the endpoint handed down by the host, if any.
    pub fn from_env() -> Option<Self> {
        let addr = env::var(ENV_RPC_ADDR).ok().filter(|v| !v.is_empty())?;
        let api_key = env::var(ENV_RPC_KEY).unwrap_or_default();
        Some(Self::new(addr, api_key))
    }
}

struct Connection {
    stream: TcpStream,
    decoder: FrameDecoder,
}

/// Synchronous client for the host RPC server.
///
/// Calls take `&mut self`, so at most one request is ever in flight per
/// client.
pub struct RpcClient {
    config: Option<ClientConfig>,
    interrupt: InterruptFlag,
    connection: Option<Connection>,
    next_request_id: u64,
}

impl RpcClient {
    /// Create a client for `config`. The connection is opened by the first call.
    pub fn new(config: Option<ClientConfig>, interrupt: InterruptFlag) -> Self {
        Self {
            config,
            interrupt,
            connection: None,
            next_request_id: 1,
        }
    }

    /// Create a client from the environment handed down by the host.
    pub fn from_env(interrupt: InterruptFlag) -> Self {
        Self::new(ClientConfig::from_env(), interrupt)
    }

    /// Whether an endpoint is configured.
    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Ask the host to quit the editor.
    pub fn quit(&mut self) -> Result<OpResult, RpcError> {
        let payload = self.call(Request::Quit)?;
        Ok(OpResult::from_payload(&payload))
    }

    /// Change the syntax language of the focused document.
    pub fn set_syntax(&mut self, language: Option<&str>) -> Result<OpResult, RpcError> {
        let payload = self.call(Request::set_syntax(language))?;
        Ok(OpResult::from_payload(&payload))
    }

    /// Ask the host to write a memory profile to `path`.
    pub fn profile_memory(&mut self, path: impl AsRef<Path>) -> Result<OpResult, RpcError> {
        let payload = self.call(Request::profile_memory(path.as_ref()))?;
        Ok(OpResult::from_payload(&payload))
    }

    /// Send `request` and block until its response arrives.
    ///
    /// Returns the success payload unmodified, or the host's structured error
    /// as [`RpcError::Operation`]. Channel failures drop the connection; the
    /// next call reconnects.
    pub fn call(&mut self, request: Request) -> Result<Value, RpcError> {
        let config = self.config.clone().ok_or(RpcError::NotConfigured)?;
        if self.connection.is_none() {
            self.connection = Some(connect(&config)?);
        }

        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let envelope = RequestEnvelope::new(config.api_key.as_str(), request_id, &request)?;
        let frame = encode_frame(&envelope).map_err(|err| match err {
            CodecError::Encode(err) => RpcError::Encode(err),
            other => RpcError::ChannelClosed(other.to_string()),
        })?;

        tracing::debug!(id = request_id, op = request.op_name(), "sending request");
        let result = self.exchange(request_id, &frame);
        match &result {
            Err(RpcError::ChannelClosed(_)) | Err(RpcError::Transport(_)) => {
                self.connection = None;
            }
            _ => {}
        }
        result.and_then(|response| response.into_outcome().map_err(RpcError::Operation))
    }

    fn exchange(&mut self, request_id: u64, frame: &[u8]) -> Result<ResponseEnvelope, RpcError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(RpcError::ChannelClosed("not connected".into()));
        };

        connection.stream.write_all(frame)?;
        connection.stream.flush()?;

        let mut buf = [0u8; 4096];
        loop {
            let next: Option<ResponseEnvelope> = connection
                .decoder
                .next_message()
                .map_err(|err| RpcError::ChannelClosed(err.to_string()))?;

            if let Some(response) = next {
                if response.id < request_id {
                    tracing::warn!(
                        id = response.id,
                        expected = request_id,
                        "discarding late response"
                    );
                    continue;
                }
                if response.id != request_id {
                    return Err(RpcError::ChannelClosed(format!(
                        "response id mismatch (expected {request_id}, got {})",
                        response.id
                    )));
                }
                return Ok(response);
            }

            if self.interrupt.take() {
                tracing::debug!(id = request_id, "call interrupted while waiting");
                return Err(RpcError::Interrupted);
            }

            match connection.stream.read(&mut buf) {
                Ok(0) => {
                    return Err(RpcError::ChannelClosed(
                        "connection closed by host".into(),
                    ));
                }
                Ok(n) => connection.decoder.push(&buf[..n]),
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(err) if is_disconnect(&err) => {
                    return Err(RpcError::ChannelClosed(err.to_string()));
                }
                Err(err) => return Err(RpcError::Transport(err)),
            }
        }
    }
}

/// Host operations reachable from script code.
///
/// The interactive loop binds its namespace to an implementation of this
/// trait instead of a process-wide client, so tests can substitute a stub.
pub trait HostApi {
    /// See [`RpcClient::quit`].
    fn quit(&mut self) -> Result<OpResult, RpcError>;
    /// See [`RpcClient::set_syntax`].
    fn set_syntax(&mut self, language: Option<&str>) -> Result<OpResult, RpcError>;
    /// See [`RpcClient::profile_memory`].
    fn profile_memory(&mut self, path: &Path) -> Result<OpResult, RpcError>;
}

impl HostApi for RpcClient {
    fn quit(&mut self) -> Result<OpResult, RpcError> {
        RpcClient::quit(self)
    }

    fn set_syntax(&mut self, language: Option<&str>) -> Result<OpResult, RpcError> {
        RpcClient::set_syntax(self, language)
    }

    fn profile_memory(&mut self, path: &Path) -> Result<OpResult, RpcError> {
        RpcClient::profile_memory(self, path)
    }
}

fn connect(config: &ClientConfig) -> Result<Connection, RpcError> {
    let addrs: Vec<SocketAddr> = config.addr.to_socket_addrs()?.collect();
    let mut last_err = None;
    for candidate in addrs {
        match TcpStream::connect_timeout(&candidate, config.connect_timeout) {
            Ok(stream) => {
                stream.set_nodelay(true).ok();
                stream.set_read_timeout(Some(config.poll_interval))?;
                tracing::debug!(addr = %candidate, "connected to host");
                return Ok(Connection {
                    stream,
                    decoder: FrameDecoder::new(config.max_frame_len),
                });
            }
            Err(err) => last_err = Some(err),
        }
    }

    Err(RpcError::Transport(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "no address resolved")
    })))
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_client_fails_every_call() {
        let mut client = RpcClient::new(None, InterruptFlag::new());
        assert!(!client.is_configured());
        assert!(matches!(client.quit(), Err(RpcError::NotConfigured)));
        assert!(matches!(
            client.set_syntax(Some("json")),
            Err(RpcError::NotConfigured)
        ));
    }

    #[test]
    fn refused_connection_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = RpcClient::new(
            Some(ClientConfig::new(addr.to_string(), "key")),
            InterruptFlag::new(),
        );
        assert!(matches!(client.quit(), Err(RpcError::Transport(_))));
        assert!(!client.is_connected());
    }
}
