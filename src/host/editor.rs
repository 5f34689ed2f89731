//! Minimal editor state standing in for a real editor core.
//!
//! It owns exactly the state the host operations touch: the focused
//! document's syntax language, its dirty flag, and whether a quit has been
//! accepted.

use crate::protocol::{ErrorKind, OperationError, Request};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use std::fs;
use std::path::Path;

/// Syntax languages known to the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    /// No highlighting.
    #[default]
    Undefined,
    /// Plain text.
    Plaintext,
    /// JSON.
    Json,
    /// YAML.
    Yaml,
    /// Go.
    Go,
    /// Python.
    Python,
    /// Rust.
    Rust,
    /// C.
    C,
    /// Bash.
    Bash,
    /// Makefile.
    Makefile,
    /// Markdown.
    Markdown,
    /// XML.
    Xml,
    /// SQL.
    Sql,
    /// Protocol Buffers.
    Protobuf,
}

impl Language {
    /// Every known language.
    pub const ALL: [Language; 14] = [
        Language::Undefined,
        Language::Plaintext,
        Language::Json,
        Language::Yaml,
        Language::Go,
        Language::Python,
        Language::Rust,
        Language::C,
        Language::Bash,
        Language::Makefile,
        Language::Markdown,
        Language::Xml,
        Language::Sql,
        Language::Protobuf,
    ];

    /// Canonical lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            Language::Undefined => "undefined",
            Language::Plaintext => "plaintext",
            Language::Json => "json",
            Language::Yaml => "yaml",
            Language::Go => "go",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::C => "c",
            Language::Bash => "bash",
            Language::Makefile => "makefile",
            Language::Markdown => "markdown",
            Language::Xml => "xml",
            Language::Sql => "sql",
            Language::Protobuf => "protobuf",
        }
    }

    /// Resolve a name case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|lang| lang.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Memory usage snapshot written by `profile_memory`.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Host process id.
    pub pid: u32,
    /// Resident set size in KiB.
    pub resident_kib: Option<u64>,
    /// Virtual memory size in KiB.
    pub virtual_kib: Option<u64>,
    /// Peak virtual memory size in KiB.
    pub peak_kib: Option<u64>,
}

impl MemoryReport {
    /// Sample the current process.
    pub fn capture() -> Result<Self, OperationError> {
        let status = fs::read_to_string("/proc/self/status").map_err(|err| {
            OperationError::new(
                ErrorKind::ProfilingUnsupported,
                format!("memory statistics unavailable: {err}"),
            )
        })?;
        Ok(Self::from_status(&status))
    }

    fn from_status(status: &str) -> Self {
        let field = |name: &str| {
            status.lines().find_map(|line| {
                let rest = line.strip_prefix(name)?.strip_prefix(':')?;
                rest.split_whitespace().next()?.parse().ok()
            })
        };
        Self {
            timestamp: Utc::now(),
            pid: std::process::id(),
            resident_kib: field("VmRSS"),
            virtual_kib: field("VmSize"),
            peak_kib: field("VmPeak"),
        }
    }
}

/// Editor state mutated by host operations.
#[derive(Debug, Default)]
pub struct EditorState {
    syntax: Language,
    unsaved_changes: bool,
    quit_requested: bool,
}

impl EditorState {
    /// Fresh editor with a clean, unhighlighted document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current syntax language.
    pub fn syntax(&self) -> Language {
        self.syntax
    }

    /// Whether a quit was accepted.
    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    /// Whether the document has unsaved changes.
    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved_changes
    }

    /// Mark the document dirty or clean.
    pub fn set_unsaved_changes(&mut self, dirty: bool) {
        self.unsaved_changes = dirty;
    }

    /// Execute one host operation.
    pub fn execute(&mut self, request: &Request) -> Result<Value, OperationError> {
        match request {
            Request::Quit => self.quit(),
            Request::SetSyntax { language } => self.set_syntax(language),
            Request::ProfileMemory { path } => self.profile_memory(path),
        }
    }

    fn quit(&mut self) -> Result<Value, OperationError> {
        if self.unsaved_changes {
            return Err(OperationError::new(
                ErrorKind::Refused,
                "document has unsaved changes",
            ));
        }
        self.quit_requested = true;
        Ok(Value::Null)
    }

    fn set_syntax(&mut self, name: &str) -> Result<Value, OperationError> {
        let language = Language::from_name(name).ok_or_else(|| {
            OperationError::new(
                ErrorKind::UnknownLanguage,
                format!("unknown syntax language '{name}'"),
            )
        })?;
        self.syntax = language;
        Ok(json!({ "description": format!("Set syntax to {language}") }))
    }

    fn profile_memory(&mut self, path: &Path) -> Result<Value, OperationError> {
        let report = MemoryReport::capture()?;
        let body = serde_json::to_vec_pretty(&report)
            .map_err(|err| OperationError::new(ErrorKind::Internal, err.to_string()))?;
        fs::write(path, body).map_err(|err| {
            OperationError::new(
                ErrorKind::PathUnwritable,
                format!("cannot write {}: {err}", path.display()),
            )
        })?;
        Ok(json!({ "description": format!("Memory profile written to {}", path.display()) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn languages_resolve_case_insensitively() {
        assert_eq!(Language::from_name("Python"), Some(Language::Python));
        assert_eq!(Language::from_name("JSON"), Some(Language::Json));
        assert_eq!(Language::from_name("not-a-real-language"), None);
        for lang in Language::ALL {
            assert_eq!(Language::from_name(lang.name()), Some(lang));
        }
    }

    #[test]
    fn set_syntax_updates_state() {
        let mut editor = EditorState::new();
        let result = editor.execute(&Request::set_syntax(Some("rust"))).unwrap();
        assert_eq!(result, json!({"description": "Set syntax to rust"}));
        assert_eq!(editor.syntax(), Language::Rust);

        editor.execute(&Request::set_syntax(None)).unwrap();
        assert_eq!(editor.syntax(), Language::Undefined);

        let err = editor
            .execute(&Request::set_syntax(Some("cobol")))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownLanguage);
        assert_eq!(editor.syntax(), Language::Undefined);
    }

    #[test]
    fn quit_is_refused_with_unsaved_changes() {
        let mut editor = EditorState::new();
        editor.set_unsaved_changes(true);
        let err = editor.execute(&Request::Quit).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Refused);
        assert!(!editor.quit_requested());

        editor.set_unsaved_changes(false);
        assert_eq!(editor.execute(&Request::Quit).unwrap(), Value::Null);
        assert!(editor.quit_requested());
    }

    #[test]
    fn parses_proc_status_fields() {
        let report = MemoryReport::from_status("Name:\tx\nVmPeak:\t  2048 kB\nVmSize:\t 1024 kB\nVmRSS:\t 512 kB\n");
        assert_eq!(report.peak_kib, Some(2048));
        assert_eq!(report.virtual_kib, Some(1024));
        assert_eq!(report.resident_kib, Some(512));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn profile_memory_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mem.json");
        let mut editor = EditorState::new();

        let result = editor.execute(&Request::profile_memory(&path)).unwrap();
        assert_eq!(
            result["description"],
            format!("Memory profile written to {}", path.display())
        );
        let written: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["pid"], std::process::id());

        let missing = dir.path().join("no/such/dir/mem.json");
        let err = editor
            .execute(&Request::profile_memory(&missing))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathUnwritable);
    }
}
