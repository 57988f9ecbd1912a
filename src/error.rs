//! Error types for the embedding bridge and event loop.

use thiserror::Error;

/// Error raised inside the script runtime.
///
/// Parse errors carry the source origin (file name or a synthetic tag such
/// as `<bootstrap>`) and the one-based line the failure was detected on.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    #[error("parse error in {origin} line {line}: {message}")]
    Parse {
        origin: String,
        line: u32,
        message: String,
    },

    #[error("runtime error: {message}")]
    Runtime { message: String },

    #[error("module error: {message}")]
    Module { message: String },
}

impl ScriptError {
    pub fn parse_at(origin: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        ScriptError::Parse {
            origin: origin.into(),
            line,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime {
            message: message.into(),
        }
    }

    pub fn module(message: impl Into<String>) -> Self {
        ScriptError::Module {
            message: message.into(),
        }
    }

    /// Arity mismatch between a callable's declared parameter count and the
    /// arguments it was invoked with.
    pub fn arity(name: &str, expected: usize, got: usize) -> Self {
        ScriptError::Runtime {
            message: format!("{name} takes {expected} argument(s), got {got}"),
        }
    }

    /// Reference to a function, method, or global that does not exist.
    pub fn unknown(what: &str, name: &str) -> Self {
        ScriptError::Runtime {
            message: format!("unknown {what}: {name}"),
        }
    }
}

/// Error returned by a Call Bridge invocation.
///
/// A `Script` error means the target raised inside the runtime; the message
/// was already forwarded to the diagnostic sink and the interpreter's error
/// slot is clear by the time the caller sees this value. A wrong result
/// count from a value-returning call is not represented here; that is a
/// binding contract violation and panics instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BridgeError {
    #[error("scripting is unavailable (no usable config)")]
    Unavailable,

    #[error("script error: {message}")]
    Script { message: String },

    #[error("constructor for class `{class}` returned a non-object value")]
    NotAnInstance { class: String },

    #[error("marshal error: {message}")]
    Marshal { message: String },
}

/// Error from interpreter lifecycle transitions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LifecycleError {
    #[error("another interpreter instance is already active in this process")]
    SecondInstance,

    #[error("invalid lifecycle state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("bootstrap failed: {message}")]
    Bootstrap { message: String },

    #[error("extension load failed: {message}")]
    Extension { message: String },
}

/// Error from event loop entry points.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoopError {
    #[error("event loop is already running")]
    AlreadyRunning,
}

/// Error from command registry dispatch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("no such command: {0}")]
    Unknown(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}
