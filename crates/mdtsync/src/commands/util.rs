//! Shared helpers for command handlers.

use serde_json::Value;

use mdtsync_core::TicketPatch;

use crate::error::CliError;

/// Parse one `field=value` argument. Values are taken as strings.
pub fn parse_assignment(arg: &str) -> Result<(String, Value), CliError> {
    let (field, value) = arg.split_once('=').ok_or_else(|| CliError::Validation {
        field: "--set".into(),
        reason: format!("expected FIELD=VALUE, got '{arg}'"),
    })?;
    let field = field.trim();
    if field.is_empty() {
        return Err(CliError::Validation {
            field: "--set".into(),
            reason: format!("missing field name in '{arg}'"),
        });
    }
    Ok((field.to_owned(), Value::String(value.to_owned())))
}

/// Fold repeated `--set` arguments into a patch; later ones win.
pub fn patch_from_args(args: &[String]) -> Result<TicketPatch, CliError> {
    args.iter()
        .map(|arg| parse_assignment(arg))
        .collect::<Result<TicketPatch, CliError>>()
}

/// Canonical ticket key: trimmed, uppercased, number zero-padded to three
/// digits (`mdt-66` -> `MDT-066`). Anything but `LETTERS-DIGITS` is rejected.
pub fn normalize_key(raw: &str) -> Result<String, CliError> {
    let upper = raw.trim().to_ascii_uppercase();
    let invalid = || CliError::Validation {
        field: "key".into(),
        reason: format!(
            "invalid ticket key '{raw}'. Expected format: PROJECT-NUMBER (e.g., MDT-066)"
        ),
    };

    let (project, number) = upper.split_once('-').ok_or_else(invalid)?;
    let well_formed = !project.is_empty()
        && project.chars().all(|c| c.is_ascii_uppercase())
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit());
    if !well_formed {
        return Err(invalid());
    }
    Ok(format!("{project}-{number:0>3}"))
}

/// `-` for absent values in table views.
pub fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_owned()
}
