// Shared transport configuration for building reqwest::Client instances.
//
// The data client and the change-stream client share TLS and timeout
// settings through this module, avoiding duplicated builder logic.

use std::path::PathBuf;
use std::time::Duration;

/// TLS verification mode (api-level mirror of core's TLS setting).
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (self-signed development servers).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Per-request timeout for the data API. Never applied to the
    /// long-lived stream request.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

const USER_AGENT: &str = concat!("mdtsync/", env!("CARGO_PKG_VERSION"));

impl TransportConfig {
    /// Build a `reqwest::Client` for request/response calls.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        self.builder()?.timeout(self.timeout).build().map_err(|e| {
            crate::error::Error::Tls(format!("failed to build HTTP client: {e}"))
        })
    }

    /// Build a `reqwest::Client` for the change stream.
    ///
    /// Only the connect phase is bounded; the response body stays open
    /// for as long as the server keeps it open.
    pub fn build_stream_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        self.builder()?.build().map_err(|e| {
            crate::error::Error::Tls(format!("failed to build stream client: {e}"))
        })
    }

    fn builder(&self) -> Result<reqwest::ClientBuilder, crate::error::Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(USER_AGENT);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                builder = builder.add_root_certificate(load_ca(path)?);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        Ok(builder)
    }
}

fn load_ca(path: &std::path::Path) -> Result<reqwest::Certificate, crate::error::Error> {
    let cert_pem = std::fs::read(path)
        .map_err(|e| crate::error::Error::Tls(format!("failed to read CA cert: {e}")))?;
    reqwest::Certificate::from_pem(&cert_pem)
        .map_err(|e| crate::error::Error::Tls(format!("invalid CA cert: {e}")))
}
