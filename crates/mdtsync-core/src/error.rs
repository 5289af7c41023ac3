// ── Core error types ──
//
// Errors surfaced by the sync engine. Consumers never see HTTP status
// codes or JSON parse failures directly: the `From<mdtsync_api::Error>`
// impl translates transport-layer errors into engine-level variants.

use thiserror::Error;

use crate::model::EventType;
use crate::sync::MutationKind;

/// Error returned by Dispatcher handlers.
///
/// Boxed so handlers can `?` whatever they call. The Dispatcher contains
/// it; it never reaches the publisher.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Transport errors ─────────────────────────────────────────────
    /// Stream handshake or read failure. Drives reconnect/fallback and is
    /// never fatal on its own.
    #[error("Change stream failed: {message}")]
    Transport { message: String },

    #[error("Cannot reach server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out")]
    Timeout,

    // ── Mutation errors ──────────────────────────────────────────────
    /// A network mutation was rejected. A corrective refetch follows.
    #[error("{operation} of {key} failed: {reason}")]
    MutationFailed {
        operation: MutationKind,
        key: String,
        reason: String,
    },

    // ── Dispatch errors ──────────────────────────────────────────────
    #[error("Handler for {event_type} failed: {message}")]
    Handler {
        event_type: EventType,
        message: String,
    },

    // ── Polling errors ───────────────────────────────────────────────
    #[error("Polling tick failed: {message}")]
    PollFailed { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Ticket not found: {key}")]
    NotFound { key: String },

    #[error("Ticket already exists: {key}")]
    AlreadyExists { key: String },

    #[error("Invalid patch: {message}")]
    InvalidPatch { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this failure came from the network rather than the server
    /// rejecting the request.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::ConnectionFailed { .. } | Self::Timeout
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<mdtsync_api::Error> for CoreError {
    fn from(err: mdtsync_api::Error) -> Self {
        match err {
            mdtsync_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            mdtsync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            mdtsync_api::Error::Timeout { .. } => CoreError::Timeout,
            mdtsync_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            mdtsync_api::Error::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            mdtsync_api::Error::StreamConnect(message) | mdtsync_api::Error::StreamRead(message) => {
                CoreError::Transport { message }
            }
            mdtsync_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
