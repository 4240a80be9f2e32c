// ── Event router ──
//
// Turns push frames into catalogue merges and subscriber notifications.
// One router task per gateway consumes frames in transport order, so
// updates to a single device are delivered in the order they arrived.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use deconz_api::PushMessage;

use crate::model::{DeviceUpdate, UniqueId};
use crate::store::{Directory, MergeResult, SubscriptionRegistry};

const RAW_EVENT_CHANNEL_SIZE: usize = 1024;

/// What the router did with one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Not an object, or a frame without `t == "event"` that carries
    /// neither `state` nor `config`; ignored.
    NotAnEvent,
    /// Scene frames carry no device state.
    SceneIgnored,
    /// `added` / `deleted`: the device set changed; the caller should
    /// schedule a forced discovery.
    Structural { event: String },
    /// Neither a group id nor a `uniqueid` to route by.
    Untargeted,
    Delivered {
        unique_id: UniqueId,
        /// `true` if the catalogue entry changed.
        merged: bool,
        delivered: usize,
        pruned: usize,
    },
}

pub struct EventRouter {
    directory: Arc<Directory>,
    registry: Arc<SubscriptionRegistry>,
    raw_events: broadcast::Sender<Arc<Value>>,
}

impl EventRouter {
    pub fn new(directory: Arc<Directory>, registry: Arc<SubscriptionRegistry>) -> Self {
        let (raw_events, _) = broadcast::channel(RAW_EVENT_CHANNEL_SIZE);
        Self {
            directory,
            registry,
            raw_events,
        }
    }

    /// Every `t == "event"` frame, verbatim, before any routing.
    pub fn raw_events(&self) -> broadcast::Receiver<Arc<Value>> {
        self.raw_events.subscribe()
    }

    /// Route one parsed frame.
    ///
    /// Only `t == "event"` frames reach [`raw_events`](Self::raw_events),
    /// but any object frame with `state` or `config` and a routable id is
    /// merged and dispatched.
    pub fn route(&self, frame: &Arc<Value>) -> RouteOutcome {
        let Some(message) = parse_frame(frame) else {
            return RouteOutcome::NotAnEvent;
        };

        if message.is_event() {
            let _ = self.raw_events.send(Arc::clone(frame));
        } else if message.state.is_none() && message.config.is_none() {
            return RouteOutcome::NotAnEvent;
        }

        if message.is_scene() {
            trace!("ignoring scene frame");
            return RouteOutcome::SceneIgnored;
        }

        if message.is_structural() {
            let event = message.event.unwrap_or_default();
            debug!(event = %event, resource = ?message.resource, id = ?message.id, "structural event");
            return RouteOutcome::Structural { event };
        }

        let unique_id = if message.is_group() {
            message.id.as_ref().map(UniqueId::group)
        } else {
            message.uniqueid.clone().map(UniqueId::from)
        };
        let Some(unique_id) = unique_id else {
            trace!(resource = ?message.resource, "frame without a routable id");
            return RouteOutcome::Untargeted;
        };

        // Group frames echo member config; only their state is merged.
        let config = if message.is_group() {
            None
        } else {
            message.config.as_ref()
        };
        let result = self
            .directory
            .merge(&unique_id, message.state.as_ref(), config);

        let merged = result.is_changed();
        let device = match result {
            MergeResult::Unknown => None,
            MergeResult::Unchanged(device) | MergeResult::Changed(device) => Some(device),
        };

        let update = DeviceUpdate {
            unique_id: unique_id.clone(),
            payload: Arc::clone(frame),
            device,
        };
        let report = self.registry.dispatch(&update);

        RouteOutcome::Delivered {
            unique_id,
            merged,
            delivered: report.delivered,
            pruned: report.pruned,
        }
    }
}

/// Parse a frame without consuming the shared value.
fn parse_frame(frame: &Value) -> Option<PushMessage> {
    if !frame.is_object() {
        return None;
    }
    PushMessage::deserialize(frame).ok()
}
