//! Typed request/response messages exchanged between the interpreter process
//! and its host.
//!
//! Every host operation is one [`Request`] answered by exactly one response
//! envelope. Envelopes are JSON documents carried in length-prefixed frames
//! (see [`codec`]). Requests carry a monotonically increasing `id` so a client
//! can recognise and drop responses that arrive after it stopped waiting.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Length-prefixed framing for envelopes.
pub mod codec;

pub use codec::{CodecError, FrameDecoder, encode_frame};

/// Version string sent in every request; the host rejects any other value.
pub const API_VERSION: &str = "1";

/// Language name sent when `set_syntax` is called without one.
pub const UNDEFINED_LANGUAGE: &str = "undefined";

/// Environment variable carrying the host RPC address to the interpreter.
pub const ENV_RPC_ADDR: &str = "EDSCRIPT_RPC_ADDR";

/// Environment variable carrying the host API key to the interpreter.
pub const ENV_RPC_KEY: &str = "EDSCRIPT_RPC_KEY";

/// Default upper bound on a single frame body.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1 << 20;

/// Host operation requested by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "params", rename_all = "snake_case")]
pub enum Request {
    /// Ask the editor to exit.
    Quit,
    /// Change the syntax language of the focused document.
    SetSyntax {
        /// Language name, or [`UNDEFINED_LANGUAGE`] to clear highlighting.
        language: String,
    },
    /// Write a diagnostic memory profile of the host to a file.
    ProfileMemory {
        /// Destination path on the host filesystem.
        path: PathBuf,
    },
}

impl Request {
    /// Build a `SetSyntax` request, substituting the sentinel for a missing name.
    pub fn set_syntax(language: Option<&str>) -> Self {
        Request::SetSyntax {
            language: language.unwrap_or(UNDEFINED_LANGUAGE).to_string(),
        }
    }

    /// Build a `ProfileMemory` request.
    pub fn profile_memory(path: impl Into<PathBuf>) -> Self {
        Request::ProfileMemory { path: path.into() }
    }

    /// Wire name of the operation.
    pub fn op_name(&self) -> &'static str {
        match self {
            Request::Quit => "quit",
            Request::SetSyntax { .. } => "set_syntax",
            Request::ProfileMemory { .. } => "profile_memory",
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Quit => write!(f, "Quit"),
            Request::SetSyntax { language } => write!(f, "SetSyntax({language})"),
            Request::ProfileMemory { path } => write!(f, "ProfileMemory({})", path.display()),
        }
    }
}

/// Category of a host-reported failure.
///
/// Unknown kinds received from a newer host are kept verbatim in
/// [`ErrorKind::Other`] so they survive a round trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorKind {
    /// The request carried the wrong API key.
    Unauthorized,
    /// The request carried an API version the host does not speak.
    UnsupportedVersion,
    /// The envelope parsed but the operation or its parameters did not.
    InvalidRequest,
    /// The host declined the operation (e.g. quitting with unsaved changes).
    Refused,
    /// `set_syntax` named a language the host does not know.
    UnknownLanguage,
    /// The profile destination could not be created or written.
    PathUnwritable,
    /// The host cannot produce memory profiles on this platform.
    ProfilingUnsupported,
    /// The host failed while executing the operation.
    Internal,
    /// Any kind this version does not recognise.
    Other(String),
}

impl ErrorKind {
    /// Wire representation of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::UnsupportedVersion => "UnsupportedVersion",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::Refused => "Refused",
            ErrorKind::UnknownLanguage => "UnknownLanguage",
            ErrorKind::PathUnwritable => "PathUnwritable",
            ErrorKind::ProfilingUnsupported => "ProfilingUnsupported",
            ErrorKind::Internal => "Internal",
            ErrorKind::Other(kind) => kind,
        }
    }
}

impl From<String> for ErrorKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "Unauthorized" => ErrorKind::Unauthorized,
            "UnsupportedVersion" => ErrorKind::UnsupportedVersion,
            "InvalidRequest" => ErrorKind::InvalidRequest,
            "Refused" => ErrorKind::Refused,
            "UnknownLanguage" => ErrorKind::UnknownLanguage,
            "PathUnwritable" => ErrorKind::PathUnwritable,
            "ProfilingUnsupported" => ErrorKind::ProfilingUnsupported,
            "Internal" => ErrorKind::Internal,
            _ => ErrorKind::Other(kind),
        }
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure reported by the host for a single operation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct OperationError {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable, single-line description.
    pub message: String,
}

impl OperationError {
    /// Construct an operation error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Request envelope as written by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// API version spoken by the client.
    pub api_version: String,
    /// Key handed to the interpreter by its host.
    pub api_key: String,
    /// Client-assigned request identifier.
    pub id: u64,
    /// Operation payload. Kept as raw JSON so the server can still answer
    /// requests whose operation it does not understand.
    pub request: Value,
}

impl RequestEnvelope {
    /// Wrap a typed request.
    pub fn new(api_key: impl Into<String>, id: u64, request: &Request) -> serde_json::Result<Self> {
        Ok(Self {
            api_version: API_VERSION.to_string(),
            api_key: api_key.into(),
            id,
            request: serde_json::to_value(request)?,
        })
    }

    /// Decode the typed request carried by the envelope.
    pub fn typed_request(&self) -> Result<Request, OperationError> {
        serde_json::from_value(self.request.clone()).map_err(|err| {
            OperationError::new(ErrorKind::InvalidRequest, format!("invalid request: {err}"))
        })
    }
}

/// Response envelope as written by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Identifier of the request being answered.
    pub id: u64,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

impl ResponseEnvelope {
    /// Successful response carrying `result`.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response.
    pub fn failure(id: u64, error: OperationError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Build from a handler outcome.
    pub fn from_outcome(id: u64, outcome: Result<Value, OperationError>) -> Self {
        match outcome {
            Ok(value) => Self::success(id, value),
            Err(err) => Self::failure(id, err),
        }
    }

    /// Collapse the envelope into the operation outcome. A response with
    /// neither field set is a success with a null payload.
    pub fn into_outcome(self) -> Result<Value, OperationError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Decoded success payload shared by the built-in host operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpResult {
    /// Optional human-readable summary supplied by the host.
    pub description: Option<String>,
}

impl OpResult {
    /// Interpret a raw success payload; anything without a `description`
    /// string is treated as an empty result.
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            description: payload
                .get("description")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_syntax_without_language_uses_sentinel() {
        assert_eq!(
            Request::set_syntax(None),
            Request::SetSyntax {
                language: "undefined".into()
            }
        );
    }

    #[test]
    fn request_wire_shape() {
        let value = serde_json::to_value(Request::set_syntax(Some("python"))).unwrap();
        assert_eq!(value, json!({"op": "set_syntax", "params": {"language": "python"}}));

        let quit = serde_json::to_value(Request::Quit).unwrap();
        assert_eq!(quit["op"], "quit");
        let back: Request = serde_json::from_value(quit).unwrap();
        assert_eq!(back, Request::Quit);
    }

    #[test]
    fn unknown_error_kind_survives_round_trip() {
        let err = OperationError::new(ErrorKind::Other("DiskOnFire".into()), "smoke");
        let text = serde_json::to_string(&err).unwrap();
        assert!(text.contains("\"DiskOnFire\""));
        let back: OperationError = serde_json::from_str(&text).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn known_error_kind_parses_to_variant() {
        let err: OperationError =
            serde_json::from_value(json!({"kind": "UnknownLanguage", "message": "nope"})).unwrap();
        assert_eq!(err.kind, ErrorKind::UnknownLanguage);
        assert_eq!(err.to_string(), "UnknownLanguage: nope");
    }

    #[test]
    fn envelope_with_unknown_op_reports_invalid_request() {
        let envelope = RequestEnvelope {
            api_version: API_VERSION.into(),
            api_key: "k".into(),
            id: 3,
            request: json!({"op": "reformat_disk"}),
        };
        let err = envelope.typed_request().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn empty_response_is_null_success() {
        let envelope: ResponseEnvelope = serde_json::from_value(json!({"id": 9})).unwrap();
        assert_eq!(envelope.into_outcome(), Ok(Value::Null));
    }

    #[test]
    fn op_result_reads_description() {
        let result = OpResult::from_payload(&json!({"description": "done"}));
        assert_eq!(result.description.as_deref(), Some("done"));
        assert_eq!(OpResult::from_payload(&Value::Null), OpResult::default());
    }
}
