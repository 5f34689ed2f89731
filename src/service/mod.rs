//! Host-side RPC server.
//!
//! The server accepts TCP connections from interpreter processes, decodes
//! framed [`RequestEnvelope`]s, authenticates them, and dispatches each typed
//! [`Request`] to a [`RequestHandler`]. Requests on one connection are
//! processed sequentially, so responses leave in the order requests arrived.

use crate::client::ClientConfig;
use crate::protocol::{
    API_VERSION, DEFAULT_MAX_FRAME_LEN, ENV_RPC_ADDR, ENV_RPC_KEY, ErrorKind, FrameDecoder,
    OperationError, Request, RequestEnvelope, ResponseEnvelope, encode_frame,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

/// Handoff of requests to the editor's main loop.
pub mod broker;

pub use broker::{Task, TaskBroker, reject_pending};

const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Executes host operations on behalf of the server.
pub trait RequestHandler: Send + Sync + 'static {
    /// Execute `request` and produce its success payload or structured failure.
    fn handle(&self, request: Request) -> Result<Value, OperationError>;
}

impl<F> RequestHandler for F
where
    F: Fn(Request) -> Result<Value, OperationError> + Send + Sync + 'static,
{
    fn handle(&self, request: Request) -> Result<Value, OperationError> {
        self(request)
    }
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, e.g. `127.0.0.1:0`.
    pub bind: String,
    /// Largest request body accepted.
    pub max_frame_len: usize,
    /// API version the server speaks.
    pub api_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:0".to_string(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            api_version: API_VERSION.to_string(),
        }
    }
}

/// Handles to the open connections, so the server can sever them.
/// A session removes its own entry when it ends.
#[derive(Default)]
struct Registry {
    next_id: u64,
    open: HashMap<u64, TcpStream>,
}

impl Registry {
    fn insert(&mut self, stream: TcpStream) -> u64 {
        self.next_id += 1;
        self.open.insert(self.next_id, stream);
        self.next_id
    }
}

type Connections = Arc<Mutex<Registry>>;

/// Running RPC server. Dropping it stops the listener and closes every
/// open connection.
pub struct RpcServer {
    local_addr: SocketAddr,
    api_key: String,
    shutdown: Arc<AtomicBool>,
    connections: Connections,
    accept_thread: Option<JoinHandle<()>>,
}

impl RpcServer {
    /// Bind and start serving with a freshly generated API key.
    pub fn start(config: ServerConfig, handler: impl RequestHandler) -> io::Result<Self> {
        let api_key = Uuid::new_v4().simple().to_string();
        Self::start_with_key(config, api_key, handler)
    }

    /// Bind and start serving, accepting only `api_key`.
    pub fn start_with_key(
        config: ServerConfig,
        api_key: impl Into<String>,
        handler: impl RequestHandler,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.bind)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let api_key = api_key.into();

        let shutdown = Arc::new(AtomicBool::new(false));
        let connections = Connections::default();
        let handler: Arc<dyn RequestHandler> = Arc::new(handler);

        let accept_thread = {
            let shutdown = Arc::clone(&shutdown);
            let connections = Arc::clone(&connections);
            let api_key = api_key.clone();
            thread::Builder::new()
                .name("edscript-rpc-accept".into())
                .spawn(move || {
                    accept_loop(listener, config, api_key, handler, shutdown, connections)
                })?
        };

        tracing::info!(addr = %local_addr, "rpc server listening");
        Ok(Self {
            local_addr,
            api_key,
            shutdown,
            connections,
            accept_thread: Some(accept_thread),
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// API key clients must present.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Environment variables that point an interpreter process at this server.
    pub fn client_env(&self) -> Vec<(String, String)> {
        vec![
            (ENV_RPC_ADDR.to_string(), self.local_addr.to_string()),
            (ENV_RPC_KEY.to_string(), self.api_key.clone()),
        ]
    }

    /// Client settings for an in-process client of this server.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.local_addr.to_string(), self.api_key.clone())
    }

    /// Number of connections whose session is still running.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().open.len()
    }

    /// Close every open connection without stopping the listener.
    pub fn disconnect_all(&self) {
        let mut connections = self.connections.lock();
        for (_, stream) in connections.open.drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Stop accepting connections and close the open ones.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnect_all();
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        tracing::info!(addr = %self.local_addr, "rpc server stopped");
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    api_key: String,
    handler: Arc<dyn RequestHandler>,
    shutdown: Arc<AtomicBool>,
    connections: Connections,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nonblocking(false) {
                    tracing::warn!(%peer, error = %err, "failed to configure connection");
                    continue;
                }
                let _ = stream.set_nodelay(true);
                let id = match stream.try_clone() {
                    Ok(registered) => connections.lock().insert(registered),
                    Err(err) => {
                        tracing::warn!(%peer, error = %err, "failed to register connection");
                        continue;
                    }
                };

                tracing::debug!(%peer, id, "accepted connection");
                let session = Session {
                    handler: Arc::clone(&handler),
                    api_key: api_key.clone(),
                    api_version: config.api_version.clone(),
                    decoder: FrameDecoder::new(config.max_frame_len),
                    stream,
                };
                let registry = Arc::clone(&connections);
                let spawned = thread::Builder::new()
                    .name("edscript-rpc-session".into())
                    .spawn(move || {
                        if let Err(err) = session.run() {
                            tracing::debug!(%peer, error = %err, "connection ended with error");
                        }
                        registry.lock().open.remove(&id);
                        tracing::debug!(%peer, id, "connection closed");
                    });
                if let Err(err) = spawned {
                    tracing::error!(%peer, error = %err, "failed to spawn session thread");
                    connections.lock().open.remove(&id);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                tracing::warn!(error = %err, "failed to accept connection");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

struct Session {
    handler: Arc<dyn RequestHandler>,
    api_key: String,
    api_version: String,
    decoder: FrameDecoder,
    stream: TcpStream,
}

impl Session {
    fn run(mut self) -> io::Result<()> {
        let mut buf = [0u8; 4096];
        loop {
            loop {
                let envelope = match self.decoder.next_message::<RequestEnvelope>() {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, "closing connection after malformed frame");
                        let _ = self.stream.shutdown(Shutdown::Both);
                        return Ok(());
                    }
                };
                let response = self.handle_request(envelope);
                self.write_response(&response)?;
            }

            let n = self.stream.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            self.decoder.push(&buf[..n]);
        }
    }

    fn handle_request(&self, envelope: RequestEnvelope) -> ResponseEnvelope {
        let id = envelope.id;
        ResponseEnvelope::from_outcome(id, self.dispatch(&envelope))
    }

    fn dispatch(&self, envelope: &RequestEnvelope) -> Result<Value, OperationError> {
        if envelope.api_key != self.api_key {
            tracing::warn!(id = envelope.id, "rejecting request with invalid api key");
            return Err(OperationError::new(
                ErrorKind::Unauthorized,
                "invalid API key",
            ));
        }

        if envelope.api_version != self.api_version {
            return Err(OperationError::new(
                ErrorKind::UnsupportedVersion,
                format!(
                    "unsupported API version: expected {}, got {}",
                    self.api_version, envelope.api_version
                ),
            ));
        }

        let request = envelope.typed_request()?;
        tracing::debug!(id = envelope.id, %request, "dispatching request");
        self.handler.handle(request)
    }

    fn write_response(&mut self, response: &ResponseEnvelope) -> io::Result<()> {
        let frame = encode_frame(response)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        self.stream.write_all(&frame)?;
        self.stream.flush()
    }
}
