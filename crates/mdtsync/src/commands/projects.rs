//! Project listing.

use std::sync::Arc;

use tabled::Tabled;

use mdtsync_core::{Project, SyncEngine};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::util::or_dash;

#[derive(Tabled)]
struct ProjectRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Tickets")]
    tickets: String,
    #[tabled(rename = "Description")]
    description: String,
}

pub async fn list(engine: &SyncEngine, global: &GlobalOpts) -> Result<(), CliError> {
    engine.refresh_all().await?;

    let active = &engine.config().scope;
    let projects = engine.projects_snapshot();
    let to_row = |p: &Arc<Project>| ProjectRow {
        id: p.id.clone(),
        name: p.name.clone(),
        code: or_dash(p.code.as_deref()),
        // Only the active project's tickets are loaded.
        tickets: if p.id == *active {
            engine.tickets_snapshot(active).len().to_string()
        } else {
            "-".into()
        },
        description: or_dash(p.description.as_deref()),
    };

    let out = output::render_list(global.output, projects.as_slice(), to_row, |p| {
        p.id.clone()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
