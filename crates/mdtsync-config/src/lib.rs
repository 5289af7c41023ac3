//! Shared configuration for mdtsync tools.
//!
//! TOML profiles (one per server/project pair), `MDT_*` environment
//! overrides, and translation to `mdtsync_core::SyncConfig`. The CLI adds
//! flag-aware wrappers on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mdtsync_core::{ReconnectConfig, SyncConfig, TlsVerification};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `None`.
    ///
    /// With no profiles configured at all, the default profile resolves
    /// to a local server so a fresh install works out of the box.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());

        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile.clone())),
            None if self.profiles.is_empty() && name == "default" => {
                Ok((name, Profile::default()))
            }
            None => Err(ConfigError::UnknownProfile { name }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named server profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Server base URL (e.g., "http://localhost:3001").
    #[serde(default = "default_server")]
    pub server: String,

    /// Active project id.
    #[serde(default = "default_project")]
    pub project: String,

    /// Data API path below `server`.
    pub api_path: Option<String>,

    /// Change stream path below `server`.
    pub stream_path: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,

    /// Sync engine tuning. Unset fields keep the engine defaults.
    #[serde(default)]
    pub sync: SyncSettings,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            server: default_server(),
            project: default_project(),
            api_path: None,
            stream_path: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
            sync: SyncSettings::default(),
        }
    }
}

fn default_server() -> String {
    "http://localhost:3001".into()
}
fn default_project() -> String {
    mdtsync_core::config::DEFAULT_SCOPE.into()
}

/// Engine timing knobs, all in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncSettings {
    pub reconnect_initial_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
    pub reconnect_attempts: Option<u32>,
    pub polling_interval_ms: Option<u64>,
    pub debounce_ms: Option<u64>,
    pub tracking_ttl_ms: Option<u64>,
    pub history_capacity: Option<usize>,
    pub error_threshold: Option<u32>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "markdown-ticket", "mdtsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("mdtsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment.
///
/// Environment keys nest with a double underscore, e.g.
/// `MDT_DEFAULTS__TIMEOUT=10` or `MDT_DEFAULT_PROFILE=work`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MDT_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `SyncConfig` from a profile, with global defaults filling the
/// gaps. No CLI flag overrides.
pub fn profile_to_sync_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<SyncConfig, ConfigError> {
    let url: url::Url = profile
        .server
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "server".into(),
            reason: format!("invalid URL: {}", profile.server),
        })?;

    if profile.project.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "project".into(),
            reason: "must not be empty".into(),
        });
    }

    let mut config = SyncConfig::new(url).with_scope(profile.project.clone());

    if let Some(ref path) = profile.api_path {
        config.api_path.clone_from(path);
    }
    if let Some(ref path) = profile.stream_path {
        config.stream_path.clone_from(path);
    }

    config.tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));

    apply_sync_settings(&mut config, &profile.sync)?;
    Ok(config)
}

fn apply_sync_settings(config: &mut SyncConfig, sync: &SyncSettings) -> Result<(), ConfigError> {
    let defaults = ReconnectConfig::default();
    config.reconnect = ReconnectConfig {
        initial_delay: sync
            .reconnect_initial_ms
            .map_or(defaults.initial_delay, Duration::from_millis),
        max_delay: sync
            .reconnect_max_ms
            .map_or(defaults.max_delay, Duration::from_millis),
        max_attempts: sync.reconnect_attempts.unwrap_or(defaults.max_attempts),
    };
    if config.reconnect.initial_delay > config.reconnect.max_delay {
        return Err(ConfigError::Validation {
            field: "sync.reconnect_initial_ms".into(),
            reason: "must not exceed sync.reconnect_max_ms".into(),
        });
    }

    if let Some(ms) = sync.polling_interval_ms {
        if ms == 0 {
            return Err(ConfigError::Validation {
                field: "sync.polling_interval_ms".into(),
                reason: "must be positive".into(),
            });
        }
        config.polling_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = sync.debounce_ms {
        config.debounce_window = Duration::from_millis(ms);
    }
    if let Some(ms) = sync.tracking_ttl_ms {
        config.tracking_ttl = Duration::from_millis(ms);
    }
    if let Some(capacity) = sync.history_capacity {
        config.history_capacity = capacity;
    }
    if let Some(threshold) = sync.error_threshold {
        config.error_threshold = threshold;
    }
    Ok(())
}

// ── Diagnostics ─────────────────────────────────────────────────────

/// Every problem with `profile`, where `profile_to_sync_config` stops at
/// the first. Warnings that would not block a connection (an unusual
/// scheme, a missing CA file) are included too. Empty means valid.
pub fn profile_issues(profile: &Profile, defaults: &Defaults) -> Vec<String> {
    let mut issues = Vec::new();

    match profile.server.parse::<url::Url>() {
        Ok(url) if !matches!(url.scheme(), "http" | "https") => {
            issues.push(format!("server uses unsupported scheme '{}'", url.scheme()));
        }
        Ok(_) => {}
        Err(_) => issues.push(format!("server is not a valid URL: {}", profile.server)),
    }
    if profile.project.trim().is_empty() {
        issues.push("project is empty".into());
    }
    if profile.timeout.unwrap_or(defaults.timeout) == 0 {
        issues.push("timeout must be at least one second".into());
    }
    if let Some(ca_path) = profile.ca_cert.as_ref().filter(|p| !p.exists()) {
        issues.push(format!("CA certificate not found at: {}", ca_path.display()));
    }

    let sync = &profile.sync;
    let reconnect = ReconnectConfig::default();
    let initial = sync
        .reconnect_initial_ms
        .map_or(reconnect.initial_delay, Duration::from_millis);
    let max = sync
        .reconnect_max_ms
        .map_or(reconnect.max_delay, Duration::from_millis);
    if initial > max {
        issues.push("sync.reconnect_initial_ms exceeds sync.reconnect_max_ms".into());
    }
    if sync.polling_interval_ms == Some(0) {
        issues.push("sync.polling_interval_ms must be positive".into());
    }
    if sync
        .tracking_ttl_ms
        .zip(sync.debounce_ms)
        .is_some_and(|(ttl, debounce)| ttl <= debounce)
    {
        issues.push("sync.tracking_ttl_ms should exceed sync.debounce_ms".into());
    }
    issues
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
default_profile = "work"

[defaults]
output = "json"
timeout = 10

[profiles.work]
server = "https://tickets.example.com"
project = "MDT"

[profiles.work.sync]
debounce_ms = 250
reconnect_attempts = 3

[profiles.local]
insecure = true
"#;

    fn load(text: &str) -> Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, text).unwrap();
        load_config_from(&path).unwrap()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert_eq!(config.defaults.output, "table");

        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "default");
        assert_eq!(profile.server, "http://localhost:3001");
    }

    #[test]
    fn profile_translates_to_sync_config() {
        let config = load(SAMPLE);
        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "work");

        let sync = profile_to_sync_config(&profile, &config.defaults).unwrap();
        assert_eq!(sync.scope, "MDT");
        assert_eq!(sync.stream_url().as_str(), "https://tickets.example.com/api/events");
        assert_eq!(sync.timeout, Duration::from_secs(10));
        assert_eq!(sync.debounce_window, Duration::from_millis(250));
        assert_eq!(sync.reconnect.max_attempts, 3);
        assert_eq!(sync.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(sync.tracking_ttl, Duration::from_secs(5));
        assert_eq!(sync.tls, TlsVerification::SystemDefaults);
    }

    #[test]
    fn partial_profile_falls_back_to_defaults() {
        let config = load(SAMPLE);
        let (_, profile) = config.profile(Some("local")).unwrap();
        assert_eq!(profile.server, "http://localhost:3001");
        assert_eq!(profile.project, "default");

        let sync = profile_to_sync_config(&profile, &config.defaults).unwrap();
        assert_eq!(sync.tls, TlsVerification::DangerAcceptInvalid);
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let config = load(SAMPLE);
        assert!(matches!(
            config.profile(Some("nope")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let defaults = Defaults::default();

        let bad_url = Profile {
            server: "not a url".into(),
            ..Profile::default()
        };
        assert!(matches!(
            profile_to_sync_config(&bad_url, &defaults),
            Err(ConfigError::Validation { ref field, .. }) if field == "server"
        ));

        let mut inverted = Profile::default();
        inverted.sync.reconnect_initial_ms = Some(60_000);
        assert!(profile_to_sync_config(&inverted, &defaults).is_err());

        let mut zero_poll = Profile::default();
        zero_poll.sync.polling_interval_ms = Some(0);
        assert!(profile_to_sync_config(&zero_poll, &defaults).is_err());
    }

    #[test]
    fn issues_are_collected_not_short_circuited() {
        let defaults = Defaults::default();
        assert!(profile_issues(&Profile::default(), &defaults).is_empty());

        let mut profile = Profile {
            server: "ftp://tickets.example.com".into(),
            project: "  ".into(),
            timeout: Some(0),
            ca_cert: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..Profile::default()
        };
        profile.sync.polling_interval_ms = Some(0);
        profile.sync.debounce_ms = Some(500);
        profile.sync.tracking_ttl_ms = Some(200);

        let issues = profile_issues(&profile, &defaults);
        assert_eq!(issues.len(), 6);
        assert!(issues[0].contains("ftp"));
        assert!(issues[3].contains("/nonexistent/ca.pem"));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.profiles.insert(
            "default".into(),
            Profile {
                project: "API".into(),
                ..Profile::default()
            },
        );
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let (_, profile) = loaded.profile(None).unwrap();
        assert_eq!(profile.project, "API");
    }
}
