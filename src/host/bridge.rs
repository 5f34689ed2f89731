use super::HostError;
use super::process::ProcessStreams;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::process::ChildStdin;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const READ_CHUNK: usize = 4096;

/// Shared writer for the interpreter's standard input.
#[derive(Debug, Clone, Default)]
pub struct InputPipe {
    stdin: Arc<Mutex<Option<ChildStdin>>>,
}

impl InputPipe {
    fn new(stdin: ChildStdin) -> Self {
        Self {
            stdin: Arc::new(Mutex::new(Some(stdin))),
        }
    }

    /// Write raw bytes.
    pub fn write(&self, bytes: &[u8]) -> Result<(), HostError> {
        let mut guard = self.stdin.lock();
        let stdin = guard.as_mut().ok_or(HostError::InputClosed)?;
        stdin.write_all(bytes)?;
        stdin.flush()?;
        Ok(())
    }

    /// Write one line; a newline is appended.
    pub fn write_line(&self, line: &str) -> Result<(), HostError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write(&bytes)
    }

    /// Close the pipe; the interpreter sees end-of-input.
    pub fn close(&self) {
        if self.stdin.lock().take().is_some() {
            tracing::debug!("interpreter input closed");
        }
    }

    /// Whether the pipe is still open.
    pub fn is_open(&self) -> bool {
        self.stdin.lock().is_some()
    }
}

/// Connects one interpreter process to the host.
///
/// The interpreter writes standard output and standard error into one pipe,
/// which a single pump thread decodes and publishes in arrival order.
/// Input is written through an [`InputPipe`].
#[derive(Debug)]
pub struct StreamBridge {
    input: InputPipe,
    pump: JoinHandle<()>,
}

impl StreamBridge {
    /// Start pumping `streams` into `output`.
    pub fn attach(streams: ProcessStreams, output: Sender<String>) -> Result<Self, HostError> {
        let ProcessStreams {
            stdin,
            output: reader,
        } = streams;
        let handle = thread::Builder::new()
            .name("edscript-output".into())
            .spawn(move || pump(reader, output))?;

        Ok(Self {
            input: InputPipe::new(stdin),
            pump: handle,
        })
    }

    /// Handle to the interpreter's input.
    pub fn input(&self) -> InputPipe {
        self.input.clone()
    }

    /// Send one line of input; a newline is appended.
    pub fn submit_input(&self, line: &str) -> Result<(), HostError> {
        self.input.write_line(line)
    }

    /// Close the interpreter's input.
    pub fn close_input(&self) {
        self.input.close();
    }

    /// Wait until the output pipe reaches end-of-file and everything read
    /// from it has been published.
    pub fn join(self) {
        self.input.close();
        if self.pump.join().is_err() {
            tracing::warn!("output pump thread panicked");
        }
    }
}

fn pump<R: Read>(mut reader: R, output: Sender<String>) {
    let mut decoder = Utf8Decoder::default();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() && output.send(text).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::debug!(error = %err, "interpreter output pipe failed");
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = output.send(rest);
    }
}

/// Incremental UTF-8 decoder that carries incomplete sequences across reads
/// and replaces invalid bytes with U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    pub(crate) fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
