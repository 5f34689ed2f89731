use super::ProcessHandle;

/// Delivers control signals to one interpreter process.
///
/// Both operations are best-effort: signalling a process that has already
/// exited does nothing.
#[derive(Debug, Clone, Copy)]
pub struct SignalController<'a> {
    process: &'a ProcessHandle,
}

impl<'a> SignalController<'a> {
    /// Controller for `process`.
    pub fn new(process: &'a ProcessHandle) -> Self {
        Self { process }
    }

    /// Ask the interpreter to abandon its current evaluation (SIGINT to its
    /// process group).
    ///
    /// The interpreter may catch the condition and keep running.
    pub fn interrupt(&self) {
        let pid = self.process.pid();
        let delivered = self.process.with_live_child(|child| send_interrupt(child.id()));
        match delivered {
            Some(Ok(())) => tracing::debug!(pid, "interrupt delivered"),
            Some(Err(err)) => tracing::warn!(pid, error = %err, "failed to deliver interrupt"),
            None => tracing::debug!(pid, "interrupt skipped; process already exited"),
        }
    }

    /// End the interpreter and anything it started unconditionally (SIGKILL
    /// to its process group).
    pub fn terminate(&self) {
        let pid = self.process.pid();
        match self.process.with_live_child(send_kill) {
            Some(Ok(())) => tracing::info!(pid, "interpreter terminated"),
            Some(Err(err)) => tracing::warn!(pid, error = %err, "failed to terminate interpreter"),
            None => tracing::debug!(pid, "terminate skipped; process already exited"),
        }
    }
}

// Interpreters lead their own process group, so the group id is the pid.
#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> std::io::Result<()> {
    use nix::unistd::Pid;

    let pid = i32::try_from(pid).map_err(std::io::Error::other)?;
    nix::sys::signal::killpg(Pid::from_raw(pid), signal).map_err(std::io::Error::from)
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> std::io::Result<()> {
    signal_group(pid, nix::sys::signal::Signal::SIGINT)
}

#[cfg(unix)]
fn send_kill(child: &mut std::process::Child) -> std::io::Result<()> {
    signal_group(child.id(), nix::sys::signal::Signal::SIGKILL)
}

#[cfg(not(unix))]
fn send_kill(child: &mut std::process::Child) -> std::io::Result<()> {
    child.kill()
}

#[cfg(not(unix))]
fn send_interrupt(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "cooperative interrupt is not supported on this platform",
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::host::InterpreterCommand;

    #[test]
    fn terminate_kills_and_is_idempotent() {
        let command = InterpreterCommand::new("sleep").arg("30");
        let (handle, _streams) = ProcessHandle::spawn(&command, 1).unwrap();
        let controller = SignalController::new(&handle);

        controller.terminate();
        let status = handle.wait().unwrap();
        assert_eq!(crate::host::process::describe_exit(&status).1, Some(9));

        controller.terminate();
        controller.interrupt();
        assert!(!handle.is_alive());
    }
}
