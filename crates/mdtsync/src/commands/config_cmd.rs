//! Config subcommand handlers.

use serde::Serialize;

use mdtsync_config::{Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::config;
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(
                &mdtsync_config::config_path().display().to_string(),
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = mdtsync_config::load_config()?;
            let (name, profile) = config::resolve_profile(global, &cfg)?;
            let issues = mdtsync_config::profile_issues(&profile, &cfg.defaults);
            let out = match global.output {
                OutputFormat::Table | OutputFormat::Plain => {
                    let body = toml::to_string_pretty(&profile)
                        .map_err(|e| CliError::Encode(e.to_string()))?;
                    format!("# profile: {name}\n{body}\n{}", issues_comment(&issues))
                }
                structured => {
                    let report = ProfileReport {
                        name: &name,
                        profile: &profile,
                        issues: &issues,
                    };
                    output::render_single(structured, &report, |_| String::new(), |_| {
                        name.clone()
                    })?
                }
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Init { name, force } => {
            let path = mdtsync_config::config_path();
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }

            let mut profile = Profile::default();
            if let Some(ref server) = global.server {
                profile.server.clone_from(server);
            }
            if let Some(ref project) = global.project {
                profile.project.clone_from(project);
            }
            // Validate before anything touches disk.
            let defaults = Config::default().defaults;
            mdtsync_config::profile_to_sync_config(&profile, &defaults)?;

            let mut cfg = Config {
                default_profile: Some(name.clone()),
                ..Config::default()
            };
            cfg.profiles.insert(name.clone(), profile);
            let written = mdtsync_config::save_config(&cfg)?;

            if !global.quiet {
                eprintln!("Wrote profile '{name}' to {}", written.display());
            }
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = mdtsync_config::load_config()?;
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            let mut names: Vec<&String> = cfg.profiles.keys().collect();
            names.sort_unstable();
            let out = names
                .into_iter()
                .map(|n| {
                    if n == default {
                        format!("* {n}")
                    } else {
                        format!("  {n}")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = mdtsync_config::load_config()?;
            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: config::available_profiles(&cfg),
                    name,
                });
            }
            cfg.default_profile = Some(name.clone());
            mdtsync_config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("Default profile set to '{name}'");
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct ProfileReport<'a> {
    name: &'a str,
    profile: &'a Profile,
    issues: &'a [String],
}

/// Issues as TOML comments, so `config show` output stays loadable.
fn issues_comment(issues: &[String]) -> String {
    if issues.is_empty() {
        return "# configuration is valid".into();
    }
    let mut out = String::from("# configuration issues:");
    for issue in issues {
        out.push_str("\n#   - ");
        out.push_str(issue);
    }
    out
}
