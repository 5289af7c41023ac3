//! Clap derive structures for the `mdtsync` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// mdtsync -- live view and edits for a markdown-ticket server
#[derive(Debug, Parser)]
#[command(
    name = "mdtsync",
    version,
    about = "Follow and edit markdown tickets in real time",
    long_about = "Talks to a markdown-ticket server over its data API and change stream.\n\n\
        Reads go through a local cache kept fresh by the stream (or by polling\n\
        when the stream is unavailable); edits are applied optimistically.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config profile to use
    #[arg(long, short = 'p', env = "MDT_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Server URL (overrides profile)
    #[arg(long, short = 's', env = "MDT_SERVER", global = true)]
    pub server: Option<String>,

    /// Project id (overrides profile)
    #[arg(long, short = 'P', env = "MDT_PROJECT", global = true)]
    pub project: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "MDT_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "MDT_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "MDT_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Follow the change feed and print every event
    Watch(WatchArgs),

    /// List tickets of the active project
    #[command(alias = "ls")]
    Tickets(TicketsArgs),

    /// List projects
    Projects,

    /// Show one ticket
    Show {
        /// Ticket key, e.g. MDT-042
        key: String,
    },

    /// Create a ticket
    Create(CreateArgs),

    /// Change fields of a ticket
    Update(UpdateArgs),

    /// Delete a ticket
    #[command(alias = "rm")]
    Delete {
        /// Ticket key
        key: String,
    },

    /// Manage configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration: Option<u64>,

    /// Print only state updates, not raw events
    #[arg(long)]
    pub updates_only: bool,

    /// Also re-print the active project's tickets whenever they change
    #[arg(long)]
    pub tickets: bool,
}

#[derive(Debug, Args)]
pub struct TicketsArgs {
    /// Only tickets with this status
    #[arg(long)]
    pub status: Option<String>,

    /// Only tickets with this priority
    #[arg(long)]
    pub priority: Option<String>,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Ticket key, e.g. MDT-042
    pub key: String,

    /// Ticket title
    #[arg(long, short = 't')]
    pub title: String,

    /// Initial status
    #[arg(long)]
    pub status: Option<String>,

    /// Initial priority
    #[arg(long)]
    pub priority: Option<String>,

    /// Extra frontmatter field (repeatable)
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    pub fields: Vec<String>,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Ticket key
    pub key: String,

    /// Field to change (repeatable)
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    pub fields: Vec<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved active profile
    Show,

    /// Print the config file location
    Path,

    /// Write a config file with one profile
    Init {
        /// Profile name
        #[arg(long, default_value = "default")]
        name: String,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
