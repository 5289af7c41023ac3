//! Ticket listing and detail.

use std::sync::Arc;

use tabled::Tabled;

use mdtsync_core::{SyncEngine, Ticket};

use crate::cli::{GlobalOpts, OutputFormat, TicketsArgs};
use crate::error::CliError;
use crate::output;

use super::util::{self, or_dash};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct TicketRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Type")]
    ticket_type: String,
    #[tabled(rename = "Modified")]
    modified: String,
}

impl TicketRow {
    fn new(t: &Arc<Ticket>, color: bool) -> Self {
        Self {
            key: t.key.clone(),
            title: t.title.clone(),
            status: t
                .status
                .as_deref()
                .map_or_else(|| "-".into(), |s| output::paint_status(s, color)),
            priority: or_dash(t.priority.as_deref()),
            ticket_type: or_dash(t.ticket_type.as_deref()),
            modified: t.last_modified.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

pub fn detail(t: &Ticket) -> String {
    let mut lines = vec![
        format!("Key:      {}", t.key),
        format!("Project:  {}", t.scope),
        format!("Title:    {}", t.title),
        format!("Status:   {}", or_dash(t.status.as_deref())),
        format!("Priority: {}", or_dash(t.priority.as_deref())),
        format!("Type:     {}", or_dash(t.ticket_type.as_deref())),
        format!("Modified: {}", t.last_modified.to_rfc3339()),
    ];
    for (field, value) in &t.fields {
        match value.as_str() {
            Some(text) => lines.push(format!("{field}: {text}")),
            None => lines.push(format!("{field}: {value}")),
        }
    }
    lines.join("\n")
}

/// Render one ticket in the selected format.
pub fn render_ticket(t: &Ticket, format: OutputFormat) -> Result<String, CliError> {
    output::render_single(format, t, detail, |t| t.key.clone())
}

/// Render a ticket list in the selected format.
pub fn render_tickets(
    tickets: &[Arc<Ticket>],
    format: OutputFormat,
    color: bool,
) -> Result<String, CliError> {
    output::render_list(format, tickets, |t| TicketRow::new(t, color), |t| t.key.clone())
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn list(
    engine: &SyncEngine,
    args: &TicketsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    engine.refresh_all().await?;

    let scope = &engine.config().scope;
    let snapshot = engine.tickets_snapshot(scope);
    let tickets: Vec<Arc<Ticket>> = snapshot
        .iter()
        .filter(|t| matches_filter(t.status.as_deref(), args.status.as_deref()))
        .filter(|t| matches_filter(t.priority.as_deref(), args.priority.as_deref()))
        .cloned()
        .collect();

    let color = output::should_color(global.color);
    let out = render_tickets(&tickets, global.output, color)?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn show(engine: &SyncEngine, key: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let key = util::normalize_key(key)?;
    engine.refresh_all().await?;
    let ticket = engine.ticket(&key).ok_or(CliError::NotFound { key })?;
    output::print_output(&render_ticket(&ticket, global.output)?, global.quiet);
    Ok(())
}

fn matches_filter(value: Option<&str>, wanted: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => value.is_some_and(|v| v.eq_ignore_ascii_case(wanted)),
    }
}
