// ── Runtime sync configuration ──
//
// These types describe *how* to talk to a markdown-ticket server and how
// the engine paces itself. They never touch disk: the CLI builds a
// `SyncConfig` (usually via `mdtsync-config`) and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use mdtsync_api::transport::{TlsMode, TransportConfig};

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed development servers).
    DangerAcceptInvalid,
}

/// Exponential backoff for stream reconnection.
///
/// Delay before retry `n` (0-based) is `min(initial_delay * 2^n, max_delay)`.
/// After `max_attempts` failed retries the transport falls back to polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

/// Configuration for one sync engine instance.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server root, e.g. `http://localhost:3001`.
    pub base_url: Url,
    /// Path of the data API below `base_url`.
    pub api_path: String,
    /// Path of the change stream below `base_url`.
    pub stream_path: String,
    /// Active project. Snapshots and polling cover this scope.
    pub scope: String,
    pub tls: TlsVerification,
    /// Request timeout for the data API (never the stream).
    pub timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub polling_interval: Duration,
    /// Coalescing window for stream change records and coordinator refetches.
    pub debounce_window: Duration,
    /// Lifetime of an optimistic-update tracking entry.
    pub tracking_ttl: Duration,
    /// Dispatcher history ring size.
    pub history_capacity: usize,
    /// Handler failures after which the Dispatcher stops emitting `api-error`.
    pub error_threshold: u32,
}

pub const DEFAULT_API_PATH: &str = "/api";
pub const DEFAULT_STREAM_PATH: &str = "/api/events";
pub const DEFAULT_SCOPE: &str = "default";

impl SyncConfig {
    /// Configuration with every tunable at its default.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            api_path: DEFAULT_API_PATH.into(),
            stream_path: DEFAULT_STREAM_PATH.into(),
            scope: DEFAULT_SCOPE.into(),
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
            polling_interval: Duration::from_millis(5000),
            debounce_window: Duration::from_millis(100),
            tracking_ttl: Duration::from_millis(5000),
            history_capacity: 100,
            error_threshold: 10,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Root of the data API.
    pub fn api_url(&self) -> Url {
        self.endpoint(&self.api_path)
    }

    /// Change stream endpoint.
    pub fn stream_url(&self) -> Url {
        self.endpoint(&self.stream_path)
    }

    pub(crate) fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.timeout,
            ..TransportConfig::default()
        }
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let base = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{base}/{}", path.trim_start_matches('/')));
        url
    }
}
