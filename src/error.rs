//! Error types for the HITL orchestrator
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Exit codes for CLI
//!
//! Domain-expected conditions (a failing rule, an unattended checkpoint)
//! are not errors here; they are absorbed into task and checkpoint state.
//! The one exception is `NoCapabilityMatch`, which the router returns and
//! the scheduler turns into a parked task.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Storage errors (3xx)
    StorageFailed = 300,
    SnapshotCorrupted = 301,
    SnapshotOutOfOrder = 302,
    SerializationFailed = 303,

    // Command surface errors (4xx)
    NotFound = 400,
    InvalidState = 401,
    Validation = 402,

    // Workflow structure errors (5xx)
    CyclicDependency = 500,
    NoCapabilityMatch = 501,

    // Registry integrity errors (6xx)
    DuplicateCapability = 600,
    CapabilityInUse = 601,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (one per error family)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            600..=699 => 60,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration or definition file failed to parse
    #[error("Failed to parse {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────

    /// JSON (de)serialization of persisted state failed
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot digest does not match its contents
    #[error("Snapshot {sequence} of run {run_id} is corrupted: {reason}")]
    SnapshotCorrupted {
        run_id: String,
        sequence: u64,
        reason: String,
    },

    /// Attempt to append a snapshot that is not strictly newer than the log head
    #[error("Snapshot {sequence} of run {run_id} is not after latest sequence {latest}")]
    SnapshotOutOfOrder {
        run_id: String,
        sequence: u64,
        latest: u64,
    },

    /// Generic storage error
    #[error("Storage error: {0}")]
    Storage(String),

    // ─────────────────────────────────────────────────────────────
    // Command Surface Errors
    // ─────────────────────────────────────────────────────────────

    /// Unknown run, task, checkpoint or capability id
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Caller attempted an illegal transition; nothing was changed
    #[error("Invalid state for {id}: {reason}")]
    InvalidState { id: String, reason: String },

    /// Malformed input (descriptor, goal, decision)
    #[error("Validation failed for {id}: {reason}")]
    Validation { id: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Workflow Errors
    // ─────────────────────────────────────────────────────────────

    /// Admitting the batch would create a dependency cycle
    #[error("Cyclic dependency in run {run_id} between tasks: {}", .cycle.join(" -> "))]
    CyclicDependency { run_id: String, cycle: Vec<String> },

    /// No registered capability covers the task's required tags
    #[error("No capability matches task {task_id} (requires: {})", .required.join(", "))]
    NoCapabilityMatch {
        task_id: String,
        required: Vec<String>,
    },

    // ─────────────────────────────────────────────────────────────
    // Registry Errors
    // ─────────────────────────────────────────────────────────────

    /// Same id re-registered with different specialization tags
    #[error(
        "Capability {id} already registered with specialization [{}], refusing [{}]",
        .existing.join(", "),
        .requested.join(", ")
    )]
    DuplicateCapability {
        id: String,
        existing: Vec<String>,
        requested: Vec<String>,
    },

    /// Capability is still assigned to non-terminal tasks
    #[error("Capability {id} is assigned to active tasks: {}", .tasks.join(", "))]
    CapabilityInUse { id: String, tasks: Vec<String> },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::Json(_) => ErrorCode::SerializationFailed,
            Error::SnapshotCorrupted { .. } => ErrorCode::SnapshotCorrupted,
            Error::SnapshotOutOfOrder { .. } => ErrorCode::SnapshotOutOfOrder,
            Error::Storage(_) => ErrorCode::StorageFailed,

            Error::NotFound { .. } => ErrorCode::NotFound,
            Error::InvalidState { .. } => ErrorCode::InvalidState,
            Error::Validation { .. } => ErrorCode::Validation,

            Error::CyclicDependency { .. } => ErrorCode::CyclicDependency,
            Error::NoCapabilityMatch { .. } => ErrorCode::NoCapabilityMatch,

            Error::DuplicateCapability { .. } => ErrorCode::DuplicateCapability,
            Error::CapabilityInUse { .. } => ErrorCode::CapabilityInUse,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Conditions the protocol recovers from on its own
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NoCapabilityMatch { .. })
    }

    /// Check if the error is fatal (process should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::SnapshotCorrupted { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'hitl-orchestrator config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check the file syntax. Run 'hitl-orchestrator config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::SnapshotCorrupted { .. } => Some(
                "A snapshot file was modified outside the orchestrator. Restore it from backup or remove the run directory."
            ),
            Error::NotFound { .. } => Some(
                "Run 'hitl-orchestrator runs' or 'hitl-orchestrator capability list' to see known ids."
            ),
            Error::InvalidState { .. } => Some(
                "Run 'hitl-orchestrator status <run-id>' to see the current state before retrying."
            ),
            Error::CyclicDependency { .. } => Some(
                "Remove one of the listed dependency edges and resubmit the whole batch."
            ),
            Error::NoCapabilityMatch { .. } => Some(
                "Register a capability whose specialization covers the required tags."
            ),
            Error::DuplicateCapability { .. } => Some(
                "Deregister the existing capability first, or register under a new id."
            ),
            Error::CapabilityInUse { .. } => Some(
                "Wait for the listed tasks to be approved or abort them before deregistering."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            self.code().as_str(),
            self
        );

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_state(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidState {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::ConfigParse {
            path: path.into(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
