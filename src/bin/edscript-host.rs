//! edscript-host - terminal demo host
//!
//! Starts the RPC server and the interpreter supervisor, then forwards
//! terminal lines to the interpreter. Host operations requested by scripts
//! run on this binary's main loop against a minimal editor state.
//!
//! Lines starting with `:` are host commands:
//! `:interrupt`, `:terminate`, `:close`, `:dirty`, `:save`, `:quit`.

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{Receiver, select, unbounded};
use edscript::host::{EditorState, HostConfig, Supervisor, SupervisorEvent};
use edscript::protocol::{ErrorKind, OperationError};
use edscript::service::{RpcServer, TaskBroker, reject_pending};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const LOOP_POLL: Duration = Duration::from_millis(20);
const STALE_TASK: &str = "the interpreter that requested this operation has exited";

#[derive(Parser)]
#[command(name = "edscript-host")]
#[command(about = "Run an edscript interpreter under a minimal editor host", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interpreter executable (default: edscript-repl next to this binary)
    #[arg(long)]
    interpreter: Option<PathBuf>,

    /// Pause before restarting an exited interpreter
    #[arg(long)]
    restart_delay_ms: Option<u64>,
}

enum Command {
    Interrupt,
    Terminate,
    Close,
    Dirty(bool),
    Quit,
    Input(String),
}

impl Command {
    fn parse(line: &str) -> Result<Self, String> {
        match line.trim() {
            ":interrupt" => Ok(Command::Interrupt),
            ":terminate" => Ok(Command::Terminate),
            ":close" => Ok(Command::Close),
            ":dirty" => Ok(Command::Dirty(true)),
            ":save" => Ok(Command::Dirty(false)),
            ":quit" => Ok(Command::Quit),
            other if other.starts_with(':') => Err(format!("unknown host command {other}")),
            _ => Ok(Command::Input(line.to_string())),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default(),
    };
    if let Some(interpreter) = &cli.interpreter {
        config.interpreter_command = vec![interpreter.display().to_string()];
    } else if cli.config.is_none() {
        if let Some(sibling) = sibling_interpreter() {
            config.interpreter_command = vec![sibling.display().to_string()];
        }
    }
    if let Some(delay) = cli.restart_delay_ms {
        config.restart_delay_ms = delay;
    }

    let (broker, tasks) = TaskBroker::channel();
    let mut server =
        RpcServer::start(config.server_config(), broker).context("failed to start RPC server")?;
    tracing::info!(addr = %server.local_addr(), "RPC server listening");

    let supervisor = Arc::new(
        Supervisor::start(&config, server.client_env()).context("failed to start interpreter")?,
    );

    let sigint = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&sigint))
        .context("failed to install SIGINT handler")?;

    let printer = {
        let supervisor = Arc::clone(&supervisor);
        thread::Builder::new()
            .name("edscript-output".into())
            .spawn(move || print_output(&supervisor))?
    };

    let lines = spawn_terminal_reader()?;
    let mut editor = EditorState::new();

    loop {
        if sigint.swap(false, Ordering::SeqCst) {
            supervisor.interrupt();
        }

        select! {
            recv(tasks) -> task => match task {
                Ok(task) if supervisor.is_running() => {
                    tracing::debug!(request = %task.request(), "executing host operation");
                    task.run_with(|request| editor.execute(request));
                }
                Ok(task) => {
                    tracing::info!(request = %task.request(), "rejecting operation from an exited interpreter");
                    task.complete(Err(OperationError::new(ErrorKind::Internal, STALE_TASK)));
                }
                Err(_) => break,
            },
            recv(lines) -> line => match line {
                Ok(line) => match Command::parse(&line) {
                    Ok(Command::Interrupt) => supervisor.interrupt(),
                    Ok(Command::Terminate) => supervisor.terminate(),
                    Ok(Command::Close) => {
                        if let Err(err) = supervisor.close_input() {
                            tracing::warn!(error = %err, "could not close interpreter input");
                        }
                    }
                    Ok(Command::Dirty(dirty)) => editor.set_unsaved_changes(dirty),
                    Ok(Command::Quit) => break,
                    Ok(Command::Input(text)) => {
                        if let Err(err) = supervisor.submit_input(&text) {
                            tracing::warn!(error = %err, "input dropped");
                        }
                    }
                    Err(message) => eprintln!("{message}"),
                },
                Err(_) => break,
            },
            default(LOOP_POLL) => {}
        }

        for event in supervisor.events().try_iter() {
            report(&event);
            if matches!(event, SupervisorEvent::Exited { .. }) {
                let rejected = reject_pending(&tasks, STALE_TASK);
                if rejected > 0 {
                    tracing::info!(rejected, "rejected operations queued by the exited interpreter");
                }
            }
        }
        if editor.quit_requested() {
            tracing::info!("quit requested by script");
            break;
        }
    }

    supervisor.shutdown();
    server.shutdown();
    if printer.join().is_err() {
        tracing::warn!("output thread panicked");
    }
    Ok(())
}

fn report(event: &SupervisorEvent) {
    match event {
        SupervisorEvent::Started { generation, pid } if *generation > 1 => {
            tracing::info!(generation, pid, "interpreter restarted with a fresh session");
        }
        SupervisorEvent::Exited {
            generation,
            code,
            signal,
        } => {
            tracing::info!(generation, ?code, ?signal, "interpreter exited");
        }
        other => tracing::debug!(event = ?other, "supervisor event"),
    }
}

fn print_output(supervisor: &Supervisor) {
    let stdout = io::stdout();
    loop {
        match supervisor.poll_output(LOOP_POLL) {
            Some(text) => {
                let mut out = stdout.lock();
                if out.write_all(text.as_bytes()).and_then(|()| out.flush()).is_err() {
                    return;
                }
            }
            None if supervisor.is_shut_down() => return,
            None => {}
        }
    }
}

fn spawn_terminal_reader() -> io::Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("edscript-terminal".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "terminal read failed");
                        return;
                    }
                }
            }
        })?;
    Ok(rx)
}

fn sibling_interpreter() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    let sibling = exe.with_file_name(format!("edscript-repl{}", env::consts::EXE_SUFFIX));
    sibling.is_file().then_some(sibling)
}
