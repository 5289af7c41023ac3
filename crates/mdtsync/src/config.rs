//! Flag-aware wrappers over `mdtsync_config`.
//!
//! Precedence is flag > `MDT_*` env > profile > defaults. Core only ever
//! receives the finished `SyncConfig`.

use mdtsync_config::{Config, ConfigError, Profile};
use mdtsync_core::SyncConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Resolve the active profile with command-line overrides applied.
pub fn resolve_profile(global: &GlobalOpts, cfg: &Config) -> Result<(String, Profile), CliError> {
    let (name, mut profile) = cfg.profile(global.profile.as_deref()).map_err(|e| match e {
        ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
            name,
            available: available_profiles(cfg),
        },
        other => other.into(),
    })?;

    if let Some(ref server) = global.server {
        profile.server.clone_from(server);
    }
    if let Some(ref project) = global.project {
        profile.project.clone_from(project);
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }
    Ok((name, profile))
}

/// Load the config file and build the engine configuration.
pub fn build_sync_config(global: &GlobalOpts) -> Result<SyncConfig, CliError> {
    let cfg = mdtsync_config::load_config()?;
    let (name, profile) = resolve_profile(global, &cfg)?;
    tracing::debug!(profile = %name, server = %profile.server, "resolved profile");
    Ok(mdtsync_config::profile_to_sync_config(&profile, &cfg.defaults)?)
}

pub fn available_profiles(cfg: &Config) -> String {
    if cfg.profiles.is_empty() {
        return "(none)".into();
    }
    let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    names.sort_unstable();
    names.join(", ")
}
