//! Shared helpers for command handlers.

use std::path::Path;
use std::sync::Arc;

use deconz_core::{Device, Gateway, UniqueId};

use crate::error::CliError;

/// Find a device by unique id, `group_<n>`, or exact (case-insensitive)
/// name in the cached catalogue.
pub fn find_device(gateway: &Gateway, identifier: &str) -> Option<Arc<Device>> {
    if let Some(device) = gateway.lookup(&UniqueId::from(identifier)) {
        return Some(device);
    }
    gateway.directory().current().and_then(|catalogue| {
        catalogue
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(identifier))
            .cloned()
    })
}

pub fn resolve_device(gateway: &Gateway, identifier: &str) -> Result<Arc<Device>, CliError> {
    find_device(gateway, identifier).ok_or_else(|| not_found(identifier))
}

pub fn not_found(identifier: &str) -> CliError {
    CliError::NotFound {
        resource_type: "device".into(),
        identifier: identifier.into(),
        list_command: "devices list".into(),
    }
}

/// Parse a JSON object given inline or via `--from-file`.
pub fn parse_body(inline: Option<&str>, file: Option<&Path>) -> Result<serde_json::Value, CliError> {
    let value = match (inline, file) {
        (_, Some(path)) => read_json_file(path)?,
        (Some(text), None) => serde_json::from_str(text)?,
        (None, None) => {
            return Err(CliError::Validation {
                field: "body".into(),
                reason: "a JSON body or --from-file is required".into(),
            });
        }
    };
    if !value.is_object() {
        return Err(CliError::Validation {
            field: "body".into(),
            reason: "must be a JSON object".into(),
        });
    }
    Ok(value)
}

/// Read and parse a JSON file for `--from-file` flags.
pub fn read_json_file(path: &Path) -> Result<serde_json::Value, CliError> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| CliError::Validation {
        field: "from-file".into(),
        reason: format!("invalid JSON: {e}"),
    })
}
