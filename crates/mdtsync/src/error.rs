//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use mdtsync_config::ConfigError;
use mdtsync_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to server at {url}")]
    #[diagnostic(
        code(mdtsync::connection_failed),
        help(
            "Check that the markdown-ticket server is running.\n\
             Reason: {reason}\n\
             Try: mdtsync --server http://localhost:3001 projects"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Change stream failed: {message}")]
    #[diagnostic(code(mdtsync::stream))]
    Stream { message: String },

    // ── Tickets ──────────────────────────────────────────────────────
    #[error("Ticket '{key}' not found")]
    #[diagnostic(
        code(mdtsync::not_found),
        help("Run: mdtsync tickets to see the tickets of the active project")
    )]
    NotFound { key: String },

    #[error("Ticket '{key}' already exists")]
    #[diagnostic(code(mdtsync::conflict))]
    Conflict { key: String },

    #[error("{message}")]
    #[diagnostic(
        code(mdtsync::mutation_failed),
        help("The server rejected the change; the local view was refreshed.")
    )]
    MutationFailed { message: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error: {message}")]
    #[diagnostic(code(mdtsync::api_error))]
    ApiError {
        message: String,
        status: Option<u16>,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(mdtsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(mdtsync::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: mdtsync config init --name {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(mdtsync::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(mdtsync::config))]
    Config(ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Request timed out")]
    #[diagnostic(
        code(mdtsync::timeout),
        help("Increase timeout with --timeout or check server responsiveness.")
    )]
    Timeout,

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    #[diagnostic(code(mdtsync::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    #[diagnostic(code(mdtsync::encode))]
    Encode(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Stream { .. } => exit_code::CONNECTION,
            Self::NotFound { .. }
            | Self::ApiError {
                status: Some(404), ..
            } => exit_code::NOT_FOUND,
            Self::Conflict { .. }
            | Self::ConfigExists { .. }
            | Self::ApiError {
                status: Some(409), ..
            } => exit_code::CONFLICT,
            Self::Timeout => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ProfileNotFound { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::Transport { message } => Self::Stream { message },
            CoreError::Timeout => Self::Timeout,
            CoreError::NotFound { key } => Self::NotFound { key },
            CoreError::AlreadyExists { key } => Self::Conflict { key },
            CoreError::InvalidPatch { message } => Self::Validation {
                field: "--set".into(),
                reason: message,
            },
            err @ CoreError::MutationFailed { .. } => Self::MutationFailed {
                message: err.to_string(),
            },
            CoreError::Api { message, status } => Self::ApiError { message, status },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            err @ (CoreError::Handler { .. } | CoreError::PollFailed { .. }) => {
                Self::Internal(err.to_string())
            }
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::UnknownProfile { name } => Self::ProfileNotFound {
                name,
                available: "(none)".into(),
            },
            other => Self::Config(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdtsync_core::MutationKind;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let cases = [
            (
                CoreError::ConnectionFailed {
                    url: "http://localhost:3001".into(),
                    reason: "refused".into(),
                },
                exit_code::CONNECTION,
            ),
            (CoreError::NotFound { key: "MDT-9".into() }, exit_code::NOT_FOUND),
            (CoreError::AlreadyExists { key: "MDT-1".into() }, exit_code::CONFLICT),
            (
                CoreError::InvalidPatch {
                    message: "bad".into(),
                },
                exit_code::USAGE,
            ),
            (
                CoreError::MutationFailed {
                    operation: MutationKind::Update,
                    key: "MDT-1".into(),
                    reason: "HTTP 500".into(),
                },
                exit_code::GENERAL,
            ),
        ];
        for (core, code) in cases {
            assert_eq!(CliError::from(core).exit_code(), code);
        }
    }
}
