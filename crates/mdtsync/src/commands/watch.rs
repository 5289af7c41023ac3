//! `watch`: run the engine and print the feed until interrupted.

use std::time::Duration;

use chrono::Local;
use owo_colors::OwoColorize;
use strum::IntoEnumIterator;
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use mdtsync_core::{Event, EventPayload, EventType, Snapshot, StateUpdate, SyncEngine, Ticket};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::tickets;

pub async fn handle(
    engine: &SyncEngine,
    args: &WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let color = output::should_color(global.color);
    let json = matches!(global.output, OutputFormat::Json | OutputFormat::Yaml);
    let quiet = global.quiet;

    let events = (!args.updates_only).then(|| {
        engine
            .dispatcher()
            .subscribe_many(EventType::iter(), move |event| {
                let line = if json {
                    output::render_json_line(event)?
                } else {
                    describe_event(event, color)
                };
                output::print_output(&line, quiet);
                Ok(())
            })
    });

    engine.on_change(move |update| {
        let line = if json {
            serde_json::json!({
                "update": update_target(update),
                "cause": update.cause(),
                "count": update_count(update),
            })
            .to_string()
        } else {
            describe_update(update, color)
        };
        output::print_output(&line, quiet);
    });
    engine.on_error(move |err| {
        if color {
            eprintln!("{} {err}", "error:".red());
        } else {
            eprintln!("error: {err}");
        }
    });

    let board = args.tickets.then(|| {
        let snapshots = engine.tickets(&engine.config().scope).into_stream();
        tokio::spawn(print_board(snapshots, global.output, color, quiet))
    });

    let mut state = engine.connection_state();
    engine.start().await;
    info!(server = %engine.config().base_url, "watching");

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            () = until(deadline) => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                if !quiet && !json {
                    eprintln!("connection: {current}");
                }
            }
        }
    }

    if let Some(subscription) = events {
        subscription.unsubscribe();
    }
    if let Some(task) = board {
        task.abort();
    }
    engine.stop().await;
    Ok(())
}

/// Re-render the ticket list on every cache write until the cache goes away.
async fn print_board<S>(mut snapshots: S, format: OutputFormat, color: bool, quiet: bool)
where
    S: Stream<Item = Snapshot<Ticket>> + Unpin,
{
    while let Some(snapshot) = snapshots.next().await {
        match tickets::render_tickets(&snapshot, format, color) {
            Ok(out) => output::print_output(&out, quiet),
            Err(e) => warn!(error = %e, "failed to render ticket board"),
        }
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── Line formatting ─────────────────────────────────────────────────

const UPDATE_LABEL: &str = "update";

fn describe_event(event: &Event, color: bool) -> String {
    let detail = match &event.payload {
        EventPayload::Change(record) if record.scope == record.key => record.key.clone(),
        EventPayload::Change(record) => format!("{} in {}", record.key, record.scope),
        EventPayload::Connected { url } => url.clone(),
        EventPayload::Disconnected { reason } => reason.clone(),
        EventPayload::TransportError { message, attempt } => {
            format!("attempt {attempt}: {message}")
        }
        EventPayload::ApiError(report) | EventPayload::NetworkError(report) => {
            match &report.context {
                Some(context) => format!("{context}: {}", report.message),
                None => report.message.clone(),
            }
        }
        EventPayload::RefreshRequested { scope } => {
            scope.clone().unwrap_or_else(|| "all".into())
        }
        EventPayload::SnapshotLoaded(snapshot) => {
            format!("{} tickets in {}", snapshot.tickets.len(), snapshot.scope)
        }
    };

    let name: &'static str = event.event_type.into();
    let kind = format!("{name:<18}");
    let kind = match (color, event.event_type.is_error_class()) {
        (false, _) => kind,
        (true, true) => kind.red().to_string(),
        (true, false) => kind.cyan().to_string(),
    };
    let source = event.source.as_ref();
    format!(
        "{} {kind} {source:<6} {detail}",
        event.timestamp.with_timezone(&Local).format("%H:%M:%S%.3f")
    )
}

fn describe_update(update: &StateUpdate, color: bool) -> String {
    let cause = update.cause().to_string();
    let cause = if color { cause.dimmed().to_string() } else { cause };
    let what = match update {
        StateUpdate::Tickets { scope, tickets, .. } => {
            format!("{} tickets in {scope}", tickets.len())
        }
        StateUpdate::Projects { projects, .. } => format!("{} projects", projects.len()),
    };
    format!(
        "{} {:<18} {what} ({cause})",
        Local::now().format("%H:%M:%S%.3f"),
        UPDATE_LABEL
    )
}

fn update_target(update: &StateUpdate) -> String {
    match update {
        StateUpdate::Tickets { scope, .. } => format!("tickets:{scope}"),
        StateUpdate::Projects { .. } => "projects".into(),
    }
}

fn update_count(update: &StateUpdate) -> usize {
    match update {
        StateUpdate::Tickets { tickets, .. } => tickets.len(),
        StateUpdate::Projects { projects, .. } => projects.len(),
    }
}
