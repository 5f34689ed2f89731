//! The scripting language evaluated by the interactive loop.
//!
//! A small dynamically typed language: newline- or `;`-separated statements,
//! `{}` blocks, `if`/`else`, `while`, functions, lists and records. Every
//! statement boundary, loop iteration and call checks the interpreter's
//! [`InterruptFlag`](crate::interrupt::InterruptFlag).

/// Syntax tree.
pub mod ast;
/// Built-in functions.
pub mod builtins;
/// Tree-walking evaluator.
pub mod eval;
/// Tokenizer.
pub mod lexer;
/// Recursive-descent parser.
pub mod parser;
/// Runtime values.
pub mod value;

pub use eval::{Interpreter, MAX_CALL_DEPTH, MAX_EVAL_DEPTH, NativeContext};
pub use parser::{MAX_NESTING, parse_program};
pub use value::{Record, Value};

use std::io;
use thiserror::Error;

/// Convenience result alias for script evaluation.
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Conditions raised while parsing or evaluating script text.
///
/// The display form is what the interactive loop prints.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    /// Invalid syntax.
    #[error("SyntaxError: {message} (line {line})")]
    Syntax {
        /// What went wrong.
        message: String,
        /// 1-based line.
        line: usize,
    },

    /// Input ended inside an open bracket or block; more lines may complete it.
    #[error("SyntaxError: unexpected end of input (line {line})")]
    Incomplete {
        /// Line where input ended.
        line: usize,
    },

    /// Reference to an unbound name.
    #[error("NameError: name '{0}' is not defined")]
    Name(String),

    /// Operation applied to a value of the wrong type.
    #[error("TypeError: {0}")]
    Type(String),

    /// Right type, unacceptable value.
    #[error("ValueError: {0}")]
    Value(String),

    /// Subscript out of range.
    #[error("IndexError: {0}")]
    Index(String),

    /// Missing record field.
    #[error("AttributeError: {0}")]
    Attribute(String),

    /// Division or modulo by zero.
    #[error("ZeroDivisionError: division by zero")]
    ZeroDivision,

    /// Integer arithmetic overflowed.
    #[error("OverflowError: integer overflow")]
    Overflow,

    /// Call nesting exceeded the limit.
    #[error("RecursionError: maximum call depth of {0} exceeded")]
    Recursion(usize),

    /// Statements and expressions under evaluation nested past the limit.
    #[error("RecursionError: maximum evaluation depth of {0} exceeded")]
    Nesting(usize),

    /// A host operation could not be delivered.
    #[error("RpcError: {0}")]
    Rpc(String),

    /// Writing output failed.
    #[error("OSError: {0}")]
    Io(String),

    /// Evaluation was interrupted.
    #[error("KeyboardInterrupt")]
    Interrupted,
}

impl ScriptError {
    /// Whether more input could turn the failing source into a valid program.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ScriptError::Incomplete { .. })
    }
}

impl From<io::Error> for ScriptError {
    fn from(err: io::Error) -> Self {
        ScriptError::Io(err.to_string())
    }
}
