//! edscript-repl - the interpreter process
//!
//! Runs the interactive loop over standard input and output. When started by
//! a host, the RPC endpoint arrives through `EDSCRIPT_RPC_ADDR` and
//! `EDSCRIPT_RPC_KEY` and the host operations in the namespace reach it.
//! SIGINT interrupts the running statement without ending the process.

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use edscript::client::RpcClient;
use edscript::host::ENV_INTERPRETER_LOG;
use edscript::interrupt::InterruptFlag;
use edscript::repl::{Repl, bindings};
use edscript::script::Interpreter;
use std::cell::RefCell;
use std::io::{self, BufRead};
use std::rc::Rc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const INPUT_POLL: Duration = Duration::from_millis(20);

/// Stack for the evaluation thread, sized for the evaluator's depth limits.
const EVAL_STACK_SIZE: usize = 256 * 1024 * 1024;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(ENV_INTERPRETER_LOG).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let interrupt = InterruptFlag::new();
    interrupt
        .install_sigint_handler()
        .context("failed to install SIGINT handler")?;

    let session = thread::Builder::new()
        .name("edscript-eval".into())
        .stack_size(EVAL_STACK_SIZE)
        .spawn(move || run_session(interrupt))
        .context("failed to start evaluation thread")?;
    match session.join() {
        Ok(outcome) => outcome,
        Err(_) => anyhow::bail!("evaluation thread panicked"),
    }
}

fn run_session(interrupt: InterruptFlag) -> anyhow::Result<()> {
    let client = RpcClient::from_env(interrupt.clone());
    tracing::debug!(configured = client.is_configured(), "interpreter starting");

    let mut interpreter = Interpreter::new(interrupt.clone());
    bindings::install(&mut interpreter, Rc::new(RefCell::new(client)));

    let mut repl = Repl::new(interpreter, io::stdout().lock());
    repl.banner().context("failed to write banner")?;
    repl.prompt()?;

    let lines = spawn_input_reader()?;
    loop {
        if interrupt.is_raised() {
            repl.interrupt()?;
            repl.prompt()?;
            continue;
        }
        match lines.recv_timeout(INPUT_POLL) {
            Ok(Ok(line)) => {
                repl.feed_line(&line)?;
                repl.prompt()?;
            }
            Ok(Err(err)) => return Err(err).context("failed to read standard input"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    repl.close()?;
    tracing::debug!("end of input");
    Ok(())
}

/// Read standard input on its own thread so the main thread can keep
/// polling the interrupt flag while waiting for a line.
fn spawn_input_reader() -> io::Result<Receiver<io::Result<String>>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("edscript-stdin".into())
        .spawn(move || {
            let stdin = io::stdin();
            let mut stdin = stdin.lock();
            loop {
                let mut raw = Vec::new();
                match stdin.read_until(b'\n', &mut raw) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&raw);
                        let line = line.trim_end_matches(['\n', '\r']).to_string();
                        if tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        let _ = tx.send(Err(err));
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}
