//! Interactive loop of the interpreter process.
//!
//! [`Repl`] is driven line by line: the caller reads input, hands each line
//! to [`Repl::feed_line`], and reports pending interrupts that arrive while
//! no evaluation is running through [`Repl::interrupt`]. Everything the user
//! should see, including error reports, goes to the output writer.

pub mod bindings;

use crate::script::{Interpreter, parse_program};
use std::io::{self, Write};

/// Prompt shown when a new statement can start.
pub const PRIMARY_PROMPT: &str = ">>> ";

/// Prompt shown while an unfinished block is being read.
pub const CONTINUATION_PROMPT: &str = "... ";

/// Where the loop is in its read/evaluate cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the first line of a statement.
    Idle,
    /// Part of a statement has been read.
    Reading,
    /// A statement is running.
    Evaluating,
    /// Input ended; the loop accepts nothing further.
    Closed,
}

/// Read-evaluate-print loop over a persistent namespace.
pub struct Repl<W: Write> {
    interpreter: Interpreter,
    out: W,
    buffer: String,
    state: LoopState,
}

impl<W: Write> Repl<W> {
    /// Create a loop that evaluates with `interpreter` and writes to `out`.
    pub fn new(interpreter: Interpreter, out: W) -> Self {
        Self {
            interpreter,
            out,
            buffer: String::new(),
            state: LoopState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// The interpreter holding the session namespace.
    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Write the greeting shown at process start.
    pub fn banner(&mut self) -> io::Result<()> {
        writeln!(
            self.out,
            "edscript {} interactive interpreter",
            crate::VERSION
        )?;
        writeln!(self.out, "Type help() for the list of built-in functions.")?;
        self.out.flush()
    }

    /// Write the prompt matching the current state.
    pub fn prompt(&mut self) -> io::Result<()> {
        if self.state == LoopState::Closed {
            return Ok(());
        }
        let prompt = if self.buffer.is_empty() {
            PRIMARY_PROMPT
        } else {
            CONTINUATION_PROMPT
        };
        self.out.write_all(prompt.as_bytes())?;
        self.out.flush()
    }

    /// Accept one line of input. A complete statement is evaluated at once;
    /// an incomplete one is buffered until a later line completes it.
    ///
    /// Evaluation errors are reported to the output and do not end the
    /// session. Only failures to write the output are returned.
    pub fn feed_line(&mut self, line: &str) -> io::Result<()> {
        if self.state == LoopState::Closed {
            return Ok(());
        }
        self.state = LoopState::Reading;
        self.buffer.push_str(line);
        self.buffer.push('\n');

        if self.buffer.trim().is_empty() {
            self.buffer.clear();
            self.state = LoopState::Idle;
            return Ok(());
        }

        let program = match parse_program(&self.buffer) {
            Ok(program) => program,
            Err(err) if err.is_incomplete() => return Ok(()),
            Err(err) => {
                self.buffer.clear();
                self.state = LoopState::Idle;
                writeln!(self.out, "{err}")?;
                return self.out.flush();
            }
        };
        self.buffer.clear();

        self.state = LoopState::Evaluating;
        let outcome = self.interpreter.run(&program, &mut self.out);
        self.state = LoopState::Idle;
        if let Err(err) = outcome {
            tracing::debug!(error = %err, "statement raised");
            writeln!(self.out, "{err}")?;
        }
        self.out.flush()
    }

    /// Handle an interrupt that arrived while waiting for input: discard any
    /// partial statement and report the interruption.
    pub fn interrupt(&mut self) -> io::Result<()> {
        self.interpreter.interrupt_flag().clear();
        if self.state == LoopState::Closed {
            return Ok(());
        }
        self.buffer.clear();
        self.state = LoopState::Idle;
        writeln!(self.out)?;
        writeln!(self.out, "KeyboardInterrupt")?;
        self.out.flush()
    }

    /// End of input. Any partial statement is dropped.
    pub fn close(&mut self) -> io::Result<()> {
        if self.state == LoopState::Closed {
            return Ok(());
        }
        self.buffer.clear();
        self.state = LoopState::Closed;
        writeln!(self.out)?;
        self.out.flush()
    }

    /// Consume the loop, returning its output writer.
    pub fn into_output(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::InterruptFlag;

    fn repl() -> (Repl<Vec<u8>>, InterruptFlag) {
        let flag = InterruptFlag::new();
        (Repl::new(Interpreter::new(flag.clone()), Vec::new()), flag)
    }

    fn take_output(repl: &mut Repl<Vec<u8>>) -> String {
        String::from_utf8(std::mem::take(&mut repl.out)).unwrap()
    }

    #[test]
    fn evaluates_and_echoes() {
        let (mut repl, _) = repl();
        repl.feed_line("1 + 2").unwrap();
        repl.feed_line("x = \"hi\"").unwrap();
        repl.feed_line("x").unwrap();
        assert_eq!(take_output(&mut repl), "3\n\"hi\"\n");
        assert_eq!(repl.state(), LoopState::Idle);
    }

    #[test]
    fn multi_line_block_uses_continuation_prompt() {
        let (mut repl, _) = repl();
        repl.feed_line("fn double(n) {").unwrap();
        assert_eq!(repl.state(), LoopState::Reading);
        repl.prompt().unwrap();
        repl.feed_line("  return n * 2").unwrap();
        repl.feed_line("}").unwrap();
        repl.prompt().unwrap();
        repl.feed_line("double(21)").unwrap();
        assert_eq!(take_output(&mut repl), "... >>> 42\n");
    }

    #[test]
    fn errors_do_not_end_the_session() {
        let (mut repl, _) = repl();
        repl.feed_line("y = 1 / 0").unwrap();
        repl.feed_line("missing").unwrap();
        repl.feed_line("1 +* 2").unwrap();
        repl.feed_line("y = 5").unwrap();
        repl.feed_line("y").unwrap();
        let out = take_output(&mut repl);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "ZeroDivisionError: division by zero");
        assert_eq!(lines[1], "NameError: name 'missing' is not defined");
        assert!(lines[2].starts_with("SyntaxError:"));
        assert_eq!(lines[3], "5");
    }

    #[test]
    fn overly_nested_input_keeps_the_session() {
        let (mut repl, _) = repl();
        repl.feed_line("x = 1").unwrap();
        repl.feed_line(&format!("1{}", "+1".repeat(100_000))).unwrap();
        repl.feed_line(&format!("{}1{}", "(".repeat(50_000), ")".repeat(50_000)))
            .unwrap();
        repl.feed_line(&format!("{}1", "-".repeat(100_000))).unwrap();
        repl.feed_line("print(x)").unwrap();
        let out = take_output(&mut repl);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4, "{out}");
        for line in &lines[..3] {
            assert!(line.starts_with("SyntaxError: expression is nested too deeply"), "{line}");
        }
        assert_eq!(lines[3], "1");
        assert_eq!(repl.state(), LoopState::Idle);
    }

    #[test]
    fn interrupt_between_statements_keeps_namespace() {
        let (mut repl, flag) = repl();
        repl.feed_line("x = 1").unwrap();
        flag.raise();
        repl.interrupt().unwrap();
        assert!(!flag.is_raised());
        repl.feed_line("print(x)").unwrap();
        assert_eq!(take_output(&mut repl), "\nKeyboardInterrupt\n1\n");
    }

    #[test]
    fn interrupt_discards_partial_statement() {
        let (mut repl, _) = repl();
        repl.feed_line("if true {").unwrap();
        repl.interrupt().unwrap();
        assert_eq!(repl.state(), LoopState::Idle);
        repl.feed_line("7").unwrap();
        assert_eq!(take_output(&mut repl), "\nKeyboardInterrupt\n7\n");
    }

    #[test]
    fn interrupt_during_evaluation_is_reported() {
        let (mut repl, flag) = repl();
        repl.feed_line("x = 1").unwrap();
        flag.raise();
        repl.feed_line("while true { x = x + 1 }").unwrap();
        repl.feed_line("x >= 1").unwrap();
        assert_eq!(take_output(&mut repl), "KeyboardInterrupt\ntrue\n");
    }

    #[test]
    fn close_is_terminal() {
        let (mut repl, _) = repl();
        repl.feed_line("(1 +").unwrap();
        repl.close().unwrap();
        assert_eq!(repl.state(), LoopState::Closed);
        repl.feed_line("2)").unwrap();
        repl.prompt().unwrap();
        assert_eq!(take_output(&mut repl), "\n");
    }

    #[test]
    fn banner_names_the_version() {
        let (mut repl, _) = repl();
        repl.banner().unwrap();
        assert!(take_output(&mut repl).starts_with(&format!("edscript {}", crate::VERSION)));
    }
}
