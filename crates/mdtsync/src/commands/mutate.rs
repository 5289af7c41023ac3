//! Optimistic mutations: create, update, delete.
//!
//! The cache is loaded first so the engine can validate against it, the
//! change is applied locally, then the command waits (bounded by the
//! request timeout) for the server to answer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use mdtsync_core::{CoreError, SyncEngine, Ticket};

use crate::cli::{CreateArgs, GlobalOpts, UpdateArgs};
use crate::error::CliError;
use crate::output;

use super::{tickets, util};

pub async fn create(
    engine: &SyncEngine,
    args: CreateArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let key = util::normalize_key(&args.key)?;
    let mut ticket = Ticket::new(engine.config().scope.clone(), key, args.title);
    ticket.status = args.status;
    ticket.priority = args.priority;
    for arg in &args.fields {
        let (field, value) = util::parse_assignment(arg)?;
        ticket.fields.insert(field, value);
    }

    let created = confirmed(engine, |e| e.create_entity(ticket)).await?;
    output::print_output(
        &tickets::render_ticket(&created, global.output)?,
        global.quiet,
    );
    Ok(())
}

pub async fn update(
    engine: &SyncEngine,
    args: UpdateArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let key = util::normalize_key(&args.key)?;
    let patch = util::patch_from_args(&args.fields)?;
    if patch.is_empty() {
        return Err(CliError::Validation {
            field: "--set".into(),
            reason: "nothing to update; pass at least one FIELD=VALUE".into(),
        });
    }

    let updated = confirmed(engine, |e| e.update_entity(&key, patch)).await?;
    output::print_output(
        &tickets::render_ticket(&updated, global.output)?,
        global.quiet,
    );
    Ok(())
}

pub async fn delete(engine: &SyncEngine, key: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let key = util::normalize_key(key)?;
    let removed = confirmed(engine, |e| e.delete_entity(&key)).await?;
    if !global.quiet {
        eprintln!("Deleted {}", removed.key);
    }
    Ok(())
}

/// Apply `mutation` and wait for the server's verdict.
async fn confirmed<F>(engine: &SyncEngine, mutation: F) -> Result<Arc<Ticket>, CliError>
where
    F: FnOnce(&SyncEngine) -> Result<Arc<Ticket>, CoreError>,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.on_error(move |err| {
        if matches!(err, CoreError::MutationFailed { .. }) {
            let _ = tx.send(err.clone());
        }
    });

    engine.refresh_all().await?;
    let ticket = mutation(engine)?;
    debug!(key = %ticket.key, "applied optimistically, awaiting server");

    tokio::time::timeout(engine.config().timeout, engine.flush())
        .await
        .map_err(|_| CliError::Timeout)?;

    match rx.try_recv() {
        Ok(err) => Err(err.into()),
        Err(_) => Ok(ticket),
    }
}
