use super::HostError;
use parking_lot::Mutex;
use std::io::{self, PipeReader, PipeWriter};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

/// Program, arguments and extra environment used to start an interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl InterpreterCommand {
    /// Command running `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Build from an argv-style list; the first element is the program.
    pub fn from_argv(argv: &[String]) -> Result<Self, HostError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| HostError::Config("interpreter command is empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            env: Vec::new(),
        })
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set several environment variables for the child.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Extra environment variables.
    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }

    /// Both output streams of the child write to `output`, so what it
    /// prints reaches the reader in the order it was written.
    fn build(&self, output: &PipeWriter) -> io::Result<Command> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(output.try_clone()?)
            .stderr(output.try_clone()?);

        // Keep terminal-generated signals away from the interpreter; the
        // host forwards them explicitly.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        Ok(command)
    }
}

/// Pipes connected to a freshly spawned interpreter.
#[derive(Debug)]
pub struct ProcessStreams {
    /// Interpreter standard input.
    pub stdin: ChildStdin,
    /// Interpreter standard output and standard error, merged.
    pub output: PipeReader,
}

/// One interpreter process lifetime.
///
/// A handle is never reused: once the process has been reaped the handle
/// stays dead and the supervisor spawns a new one with the next generation.
#[derive(Debug)]
pub struct ProcessHandle {
    generation: u64,
    pid: u32,
    child: Mutex<Child>,
    alive: AtomicBool,
    status: Mutex<Option<ExitStatus>>,
}

impl ProcessHandle {
    /// Start `command` as generation `generation`.
    pub fn spawn(
        command: &InterpreterCommand,
        generation: u64,
    ) -> Result<(Self, ProcessStreams), HostError> {
        let spawn_error = |source: io::Error| HostError::Spawn {
            program: command.program.clone(),
            source,
        };
        let (output, writer) = io::pipe().map_err(spawn_error)?;
        let mut process = command.build(&writer).map_err(spawn_error)?;
        drop(writer);
        let spawned = process.spawn();
        // The parent must not keep a write end open, or the reader never
        // sees end-of-file.
        drop(process);
        let mut child = spawned.map_err(spawn_error)?;

        let streams = match child.stdin.take() {
            Some(stdin) => ProcessStreams { stdin, output },
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(HostError::Io(io::Error::other(
                    "interpreter stdio pipes unavailable",
                )));
            }
        };

        let pid = child.id();
        tracing::debug!(pid, generation, program = %command.program, "spawned interpreter");
        Ok((
            Self {
                generation,
                pid,
                child: Mutex::new(child),
                alive: AtomicBool::new(true),
                status: Mutex::new(None),
            },
            streams,
        ))
    }

    /// Restart counter value this process was started with.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the process has not been observed to exit yet.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Exit status, once reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.status.lock()
    }

    /// Reap the process if it has exited, without blocking.
    pub fn try_reap(&self) -> Option<ExitStatus> {
        let mut child = self.child.lock();
        self.poll_locked(&mut child)
    }

    /// Block until the process exits.
    pub fn wait(&self) -> Result<ExitStatus, HostError> {
        let mut child = self.child.lock();
        if let Some(status) = self.poll_locked(&mut child) {
            return Ok(status);
        }
        let status = child.wait()?;
        self.mark_exited(status);
        Ok(status)
    }

    /// Run `f` against the child only while it is still running.
    ///
    /// The exit check and `f` happen under the same lock as reaping, so a
    /// pid is never signalled after it has been reaped and possibly reused.
    pub(crate) fn with_live_child<R>(&self, f: impl FnOnce(&mut Child) -> R) -> Option<R> {
        let mut child = self.child.lock();
        if self.poll_locked(&mut child).is_some() {
            return None;
        }
        Some(f(&mut child))
    }

    fn poll_locked(&self, child: &mut Child) -> Option<ExitStatus> {
        if let Some(status) = *self.status.lock() {
            return Some(status);
        }
        match child.try_wait() {
            Ok(Some(status)) => {
                self.mark_exited(status);
                Some(status)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(pid = self.pid, error = %err, "failed to poll interpreter status");
                None
            }
        }
    }

    fn mark_exited(&self, status: ExitStatus) {
        *self.status.lock() = Some(status);
        self.alive.store(false, Ordering::SeqCst);
        tracing::debug!(pid = self.pid, generation = self.generation, %status, "interpreter reaped");
    }
}

/// Exit code and terminating signal of a finished process.
pub fn describe_exit(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        (status.code(), status.signal())
    }
    #[cfg(not(unix))]
    {
        (status.code(), None)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn reaps_an_exited_child_once() {
        let command = InterpreterCommand::new("sh").arg("-c").arg("exit 3");
        let (handle, _streams) = ProcessHandle::spawn(&command, 1).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let status = loop {
            if let Some(status) = handle.try_reap() {
                break status;
            }
            assert!(Instant::now() < deadline, "child did not exit");
            std::thread::sleep(Duration::from_millis(5));
        };

        assert_eq!(status.code(), Some(3));
        assert!(!handle.is_alive());
        assert!(handle.with_live_child(|_| ()).is_none());
        assert_eq!(handle.try_reap(), Some(status));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let command = InterpreterCommand::new("/nonexistent/edscript-repl");
        assert!(matches!(
            ProcessHandle::spawn(&command, 1),
            Err(HostError::Spawn { .. })
        ));
    }

    #[test]
    fn output_reaches_end_of_file_when_the_child_exits() {
        use std::io::Read;

        let command = InterpreterCommand::new("sh").arg("-c").arg("echo out; echo err >&2");
        let (handle, mut streams) = ProcessHandle::spawn(&command, 1).unwrap();
        let mut text = String::new();
        streams.output.read_to_string(&mut text).unwrap();
        assert_eq!(text, "out\nerr\n");
        assert_eq!(handle.wait().unwrap().code(), Some(0));
    }

    #[test]
    fn env_vars_reach_the_child() {
        let command = InterpreterCommand::new("sh")
            .arg("-c")
            .arg("test \"$EDSCRIPT_MARKER\" = yes")
            .env("EDSCRIPT_MARKER", "yes");
        let (handle, _streams) = ProcessHandle::spawn(&command, 1).unwrap();
        assert_eq!(handle.wait().unwrap().code(), Some(0));
    }
}
