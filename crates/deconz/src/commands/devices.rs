//! Device command handlers: list, get, set.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use deconz_core::{CoreError, Device, DeviceFilter, Gateway, GatewayConfig};

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts, ListArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ────────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Unique ID")]
    unique_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "On")]
    on: String,
    #[tabled(rename = "Model")]
    model: String,
}

impl From<&Arc<Device>> for DeviceRow {
    fn from(d: &Arc<Device>) -> Self {
        Self {
            unique_id: d.unique_id.to_string(),
            name: d.name.clone(),
            kind: d.kind.to_string(),
            resource_type: d.resource_type.clone().unwrap_or_default(),
            on: d.is_on().map(|on| if on { "on" } else { "off" }).unwrap_or("-").into(),
            model: d.model_id.clone().unwrap_or_default(),
        }
    }
}

fn detail(d: &Arc<Device>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Unique ID:    {}", d.unique_id);
    let _ = writeln!(out, "Name:         {}", d.name);
    let _ = writeln!(out, "Kind:         {} (#{})", d.kind, d.index);
    if let Some(ref t) = d.resource_type {
        let _ = writeln!(out, "Type:         {t}");
    }
    if let Some(ref m) = d.model_id {
        let _ = writeln!(out, "Model:        {m}");
    }
    if let Some(ref m) = d.manufacturer {
        let _ = writeln!(out, "Manufacturer: {m}");
    }
    write_map(&mut out, "State", &d.state);
    write_map(&mut out, "Config", &d.config);
    out.trim_end().to_owned()
}

fn write_map(out: &mut String, title: &str, map: &serde_json::Map<String, Value>) {
    if map.is_empty() {
        return;
    }
    let _ = writeln!(out, "{title}:");
    for (key, value) in map {
        let _ = writeln!(out, "  {key:<16} {value}");
    }
}

fn filter_for(args: &ListArgs) -> DeviceFilter {
    match (args.kind, &args.resource_type, &args.name) {
        (Some(kind), None, None) => DeviceFilter::ByKind(kind.into()),
        (None, Some(t), None) => DeviceFilter::ByResourceType(t.clone()),
        (None, None, Some(n)) => DeviceFilter::NameContains(n.clone()),
        (None, None, None) => DeviceFilter::All,
        (kind, resource_type, name) => {
            let kind = kind.map(deconz_core::DeviceKind::from);
            let resource_type = resource_type.clone();
            let name = name.as_ref().map(|n| n.to_lowercase());
            DeviceFilter::Custom(Box::new(move |d: &Device| {
                kind.is_none_or(|k| d.kind == k)
                    && resource_type
                        .as_deref()
                        .is_none_or(|t| d.resource_type.as_deref() == Some(t))
                    && name
                        .as_deref()
                        .is_none_or(|n| d.name.to_lowercase().contains(n))
            }))
        }
    }
}

#[derive(Serialize)]
struct SetResult {
    unique_id: String,
    path: String,
    success: Vec<Value>,
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(
    config: GatewayConfig,
    args: DevicesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        DevicesCommand::List(list) => {
            let filter = filter_for(&list);
            let selection = Gateway::oneshot(config, |gw| async move {
                gw.list_for_selection(&filter, false).await
            })
            .await?;
            let out = output::render_list(
                &global.output,
                &selection.matched,
                |d| DeviceRow::from(d),
                |d| d.unique_id.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Get { device } => {
            let id = device.clone();
            let found = Gateway::oneshot(config, |gw| async move {
                Ok::<_, CoreError>(util::find_device(&gw, &id))
            })
            .await?;
            let found = found.ok_or_else(|| util::not_found(&device))?;
            let out = output::render_single(&global.output, &found, detail, |d| {
                d.unique_id.to_string()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Set {
            device,
            body,
            from_file,
        } => {
            let body = util::parse_body(body.as_deref(), from_file.as_deref())?;
            let result = Gateway::oneshot(config, |gw| async move {
                let target = util::find_device(&gw, &device)
                    .ok_or(CoreError::DeviceNotFound { identifier: device })?;
                let success = gw.send_command(&target.unique_id, &body).await?;
                Ok::<_, CoreError>(SetResult {
                    unique_id: target.unique_id.to_string(),
                    path: target.command_path(),
                    success,
                })
            })
            .await?;
            let out = output::render_single(
                &global.output,
                &result,
                |r| {
                    format!(
                        "Sent to {} ({}): {} change(s) acknowledged",
                        r.unique_id,
                        r.path,
                        r.success.len()
                    )
                },
                |r| r.unique_id.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;
    use crate::cli::KindArg;
    use deconz_core::{DeviceKind, UniqueId};

    fn light(name: &str, on: bool) -> Device {
        let mut state = Map::new();
        state.insert("on".into(), json!(on));
        Device {
            unique_id: UniqueId::from("AA:01"),
            kind: DeviceKind::Light,
            index: 1,
            name: name.into(),
            resource_type: Some("Extended color light".into()),
            model_id: Some("LCT015".into()),
            manufacturer: None,
            state,
            config: Map::new(),
        }
    }

    #[test]
    fn combined_filters_all_apply() {
        let args = ListArgs {
            kind: Some(KindArg::Light),
            resource_type: None,
            name: Some("desk".into()),
        };
        let filter = filter_for(&args);
        assert!(filter.matches(&light("Desk lamp", true)));
        assert!(!filter.matches(&light("Ceiling", true)));
    }

    #[test]
    fn row_shows_on_state() {
        let row = DeviceRow::from(&Arc::new(light("Desk lamp", false)));
        assert_eq!(row.on, "off");
        assert_eq!(row.kind, "light");
    }

    #[test]
    fn detail_lists_state_keys() {
        let text = detail(&Arc::new(light("Desk lamp", true)));
        assert!(text.contains("Unique ID:    AA:01"));
        assert!(text.contains("on"));
    }
}
