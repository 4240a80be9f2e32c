//! `deconz watch`: follow device updates from the push feed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::select_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use deconz_core::{Device, DeviceUpdate, Gateway, GatewayConfig, SubscriberId};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct WatchLine<'a> {
    at: DateTime<Utc>,
    unique_id: &'a str,
    name: Option<&'a str>,
    event: &'a Value,
}

impl WatchLine<'_> {
    fn line(&self) -> String {
        // Show the changed section when there is one; otherwise the frame.
        let body = ["state", "config", "attr"]
            .iter()
            .find_map(|key| self.event.get(*key))
            .unwrap_or(self.event);
        format!(
            "{} {:<28} {:<24} {}",
            self.at.format("%H:%M:%S"),
            self.unique_id,
            self.name.unwrap_or("?"),
            body
        )
    }
}

fn print_update(update: &DeviceUpdate, global: &GlobalOpts) {
    let line = WatchLine {
        at: Utc::now(),
        unique_id: update.unique_id.as_str(),
        name: update.device.as_deref().map(|d| d.name.as_str()),
        event: &update.payload,
    };
    let out = output::render_single(&global.output, &line, WatchLine::line, WatchLine::line);
    output::print_output(&out, global.quiet);
}

async fn next_new_device(
    rx: &mut Option<broadcast::Receiver<Arc<Device>>>,
) -> Option<Arc<Device>> {
    let Some(receiver) = rx else {
        return std::future::pending().await;
    };
    loop {
        match receiver.recv().await {
            Ok(device) => return Some(device),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "new-device announcements lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

pub async fn handle(
    config: GatewayConfig,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let gateway = Gateway::new(config)?;
    let mut new_devices = args.new.then(|| gateway.new_devices());
    gateway.connect().await?;

    let targets = if args.devices.is_empty() {
        gateway
            .directory()
            .current()
            .map(|catalogue| catalogue.sorted())
            .unwrap_or_default()
    } else {
        args.devices
            .into_iter()
            .map(|id| util::resolve_device(&gateway, &id))
            .collect::<Result<Vec<_>, _>>()?
    };

    let subscriber = SubscriberId::generate();
    let mut updates = select_all(
        targets
            .iter()
            .map(|d| gateway.subscribe(subscriber.clone(), d.unique_id.clone()).into_stream()),
    );
    info!(devices = targets.len(), "watching");

    let mut state = gateway.connection_state();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => break,

            Some(update) = updates.next() => print_update(&update, global),

            device = next_new_device(&mut new_devices) => match device {
                Some(device) => {
                    let line = format!("new {} {} {}", device.kind, device.unique_id, device.name);
                    let out = output::render_single(
                        &global.output,
                        &*device,
                        |_| line.clone(),
                        |_| line.clone(),
                    );
                    output::print_output(&out, global.quiet);
                    updates.push(
                        gateway
                            .subscribe(subscriber.clone(), device.unique_id.clone())
                            .into_stream(),
                    );
                }
                None => new_devices = None,
            },

            Ok(()) = state.changed() => {
                let current = state.borrow_and_update().clone();
                info!(state = ?current, "connection state changed");
            }
        }
    }

    gateway.unsubscribe(&subscriber);
    gateway.close().await;
    Ok(())
}
