use super::bridge::{InputPipe, StreamBridge};
use super::process::{InterpreterCommand, ProcessHandle, describe_exit};
use super::signal::SignalController;
use super::{HostConfig, HostError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const PAUSE_SLICE: Duration = Duration::from_millis(10);

/// Interpreter lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A new interpreter process is running.
    Started {
        /// Restart counter, starting at 1.
        generation: u64,
        /// OS process id.
        pid: u32,
    },
    /// An interpreter process exited and its output has been drained.
    Exited {
        /// Generation of the process that exited.
        generation: u64,
        /// Exit code, if it exited normally.
        code: Option<i32>,
        /// Terminating signal, if it was killed by one.
        signal: Option<i32>,
    },
    /// A replacement could not be started; it is retried after the restart delay.
    SpawnFailed {
        /// Generation that failed to start.
        generation: u64,
        /// Spawn error.
        message: String,
    },
    /// The supervisor has shut down and will not start another process.
    ShutDown,
}

struct Live {
    process: Arc<ProcessHandle>,
    bridge: StreamBridge,
}

struct Shared {
    command: InterpreterCommand,
    restart_delay: Duration,
    poll_interval: Duration,
    current: Mutex<Option<Live>>,
    shutdown: AtomicBool,
    generation: AtomicU64,
    output: Sender<String>,
    events: Sender<SupervisorEvent>,
}

impl Shared {
    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SupervisorEvent) {
        let _ = self.events.send(event);
    }

    fn spawn_next(&self) -> Result<(), HostError> {
        let mut current = self.current.lock();
        if self.is_shutting_down() || current.is_some() {
            return Ok(());
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let spawned = ProcessHandle::spawn(&self.command, generation).and_then(|(process, streams)| {
            let bridge = StreamBridge::attach(streams, self.output.clone())?;
            Ok((process, bridge))
        });

        match spawned {
            Ok((process, bridge)) => {
                let pid = process.pid();
                *current = Some(Live {
                    process: Arc::new(process),
                    bridge,
                });
                drop(current);
                tracing::info!(generation, pid, "interpreter started");
                self.emit(SupervisorEvent::Started { generation, pid });
                Ok(())
            }
            Err(err) => {
                drop(current);
                tracing::error!(generation, error = %err, "failed to start interpreter");
                self.emit(SupervisorEvent::SpawnFailed {
                    generation,
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Remove the current process from the slot if it has exited.
    fn take_exited(&self) -> Option<(Live, std::process::ExitStatus)> {
        let mut current = self.current.lock();
        let status = current.as_ref()?.process.try_reap()?;
        current.take().map(|live| (live, status))
    }

    fn drain_and_report(&self, live: Live, status: std::process::ExitStatus) {
        let generation = live.process.generation();
        live.bridge.join();
        let (code, signal) = describe_exit(&status);
        tracing::info!(generation, ?code, ?signal, "interpreter exited");
        self.emit(SupervisorEvent::Exited {
            generation,
            code,
            signal,
        });
    }

    /// Sleep for `duration`, returning early once shutdown begins.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_shutting_down() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }
}

fn watch(shared: Arc<Shared>) {
    while !shared.is_shutting_down() {
        if let Some((live, status)) = shared.take_exited() {
            shared.drain_and_report(live, status);
            shared.pause(shared.restart_delay);
            let _ = shared.spawn_next();
            continue;
        }

        let empty = shared.current.lock().is_none();
        if empty {
            shared.pause(shared.restart_delay);
            let _ = shared.spawn_next();
        } else {
            thread::sleep(shared.poll_interval);
        }
    }
}

/// Owns the interpreter subprocess and keeps one running.
///
/// Whenever the current process exits for any reason other than
/// [`Supervisor::shutdown`], its output is drained and exactly one
/// replacement is started after the restart delay. The replacement starts
/// with a fresh session.
pub struct Supervisor {
    shared: Arc<Shared>,
    output: Receiver<String>,
    events: Receiver<SupervisorEvent>,
    carry: Mutex<String>,
    output_chunk_limit: usize,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Start the interpreter described by `config`, passing `extra_env`
    /// (typically the RPC endpoint) to every process generation.
    pub fn start(config: &HostConfig, extra_env: Vec<(String, String)>) -> Result<Self, HostError> {
        let command = config.interpreter()?.envs(extra_env);
        let (output_tx, output) = unbounded();
        let (events_tx, events) = unbounded();

        let shared = Arc::new(Shared {
            command,
            restart_delay: config.restart_delay(),
            poll_interval: config.poll_interval(),
            current: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            output: output_tx,
            events: events_tx,
        });

        shared.spawn_next()?;

        let watcher = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("edscript-supervisor".into())
                .spawn(move || watch(shared))?
        };

        Ok(Self {
            shared,
            output,
            events,
            carry: Mutex::new(String::new()),
            output_chunk_limit: config.output_chunk_limit.max(4),
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// Lifecycle event stream.
    pub fn events(&self) -> &Receiver<SupervisorEvent> {
        &self.events
    }

    /// The current process, if one is running.
    pub fn current(&self) -> Option<Arc<ProcessHandle>> {
        self.shared
            .current
            .lock()
            .as_ref()
            .map(|live| Arc::clone(&live.process))
    }

    /// Whether a process is in the slot and has not exited.
    pub fn is_running(&self) -> bool {
        self.current()
            .is_some_and(|process| process.try_reap().is_none())
    }

    /// Generation of the most recently started process.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Whether [`Supervisor::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shutting_down()
    }

    /// Wait up to `timeout` for interpreter output.
    ///
    /// Returns at most `output_chunk_limit` bytes, coalescing whatever is
    /// immediately available once the first chunk arrives.
    pub fn poll_output(&self, timeout: Duration) -> Option<String> {
        let mut carry = self.carry.lock();
        if carry.is_empty() {
            match self.output.recv_timeout(timeout) {
                Ok(chunk) => carry.push_str(&chunk),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None;
                }
            }
        }

        while carry.len() < self.output_chunk_limit {
            match self.output.try_recv() {
                Ok(chunk) => carry.push_str(&chunk),
                Err(_) => break,
            }
        }

        if carry.len() <= self.output_chunk_limit {
            return Some(std::mem::take(&mut *carry));
        }

        let mut split = self.output_chunk_limit;
        while !carry.is_char_boundary(split) {
            split -= 1;
        }
        let rest = carry.split_off(split);
        Some(std::mem::replace(&mut *carry, rest))
    }

    /// Send one line to the interpreter.
    ///
    /// The write happens outside the process slot lock, so a child that
    /// stops reading cannot stall reaping.
    pub fn submit_input(&self, line: &str) -> Result<(), HostError> {
        self.input()?.write_line(line)
    }

    /// Close the interpreter's input. The interpreter exits at end-of-input
    /// and is replaced with a fresh one.
    pub fn close_input(&self) -> Result<(), HostError> {
        self.input()?.close();
        Ok(())
    }

    /// Deliver a cooperative interrupt to the current process.
    pub fn interrupt(&self) {
        if let Some(process) = self.current() {
            SignalController::new(&process).interrupt();
        }
    }

    /// Kill the current process. A replacement is started as for any other exit.
    pub fn terminate(&self) {
        if let Some(process) = self.current() {
            SignalController::new(&process).terminate();
        }
    }

    /// Stop the interpreter for good; no replacement is started.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("supervisor shutting down");

        if let Some(watcher) = self.watcher.lock().take() {
            if watcher.join().is_err() {
                tracing::warn!("supervisor watcher panicked");
            }
        }

        let live = self.shared.current.lock().take();
        if let Some(live) = live {
            live.bridge.close_input();
            SignalController::new(&live.process).terminate();
            match live.process.wait() {
                Ok(status) => self.shared.drain_and_report(live, status),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to reap interpreter during shutdown");
                    live.bridge.join();
                }
            }
        }

        self.shared.emit(SupervisorEvent::ShutDown);
    }

    fn input(&self) -> Result<InputPipe, HostError> {
        self.shared
            .current
            .lock()
            .as_ref()
            .map(|live| live.bridge.input())
            .ok_or(HostError::NotRunning)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
