//! Command dispatch: bridges CLI args -> engine calls -> output formatting.

pub mod config_cmd;
pub mod mutate;
pub mod projects;
pub mod tickets;
pub mod util;
pub mod watch;

use mdtsync_core::SyncEngine;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a server-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    engine: &SyncEngine,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(engine, &args, global).await,
        Command::Tickets(args) => tickets::list(engine, &args, global).await,
        Command::Show { key } => tickets::show(engine, &key, global).await,
        Command::Projects => projects::list(engine, global).await,
        Command::Create(args) => mutate::create(engine, args, global).await,
        Command::Update(args) => mutate::update(engine, args, global).await,
        Command::Delete { key } => mutate::delete(engine, &key, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "config and completions run without a server".into(),
        )),
    }
}
