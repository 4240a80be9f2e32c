// ── Gateway directory ──
//
// Owns the catalogue. Discovery passes replace it wholesale, push updates
// merge into single entries; both go through the `watch` channel's lock so
// writers are serialized and readers always see a complete snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info, warn};

use deconz_api::GatewayClient;
use deconz_api::models::FullState;

use crate::convert::catalogue_from_state;
use crate::error::CoreError;
use crate::model::{Device, UniqueId};
use crate::store::Catalogue;
use crate::stream::{CatalogueStream, DeviceFilter};

const NEW_DEVICE_CHANNEL_SIZE: usize = 256;

/// Result of merging a push update into the catalogue.
#[derive(Debug, Clone)]
pub enum MergeResult {
    /// The id is not in the catalogue; nothing was touched.
    Unknown,
    /// The patch carried only values the device already had.
    Unchanged(Arc<Device>),
    /// A new snapshot was published.
    Changed(Arc<Device>),
}

impl MergeResult {
    pub fn device(&self) -> Option<&Arc<Device>> {
        match self {
            Self::Unknown => None,
            Self::Unchanged(device) | Self::Changed(device) => Some(device),
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed(_))
    }
}

/// Catalogue entries partitioned by a [`DeviceFilter`].
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub matched: Vec<Arc<Device>>,
    pub rejected: Vec<Arc<Device>>,
}

/// Failure of the last discovery pass, kept so coalesced callers can be
/// handed the same outcome.
#[derive(Debug, Clone)]
struct PassFailure {
    unauthorized: bool,
    message: String,
}

impl PassFailure {
    fn from_error(err: &CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailed { message } => Self {
                unauthorized: true,
                message: message.clone(),
            },
            CoreError::DiscoveryFailed { reason } => Self {
                unauthorized: false,
                message: reason.clone(),
            },
            other => Self {
                unauthorized: false,
                message: other.to_string(),
            },
        }
    }

    fn to_error(&self) -> CoreError {
        if self.unauthorized {
            CoreError::AuthenticationFailed {
                message: self.message.clone(),
            }
        } else {
            CoreError::DiscoveryFailed {
                reason: self.message.clone(),
            }
        }
    }
}

#[derive(Default)]
struct PassRecord {
    last_failure: Option<PassFailure>,
}

pub struct Directory {
    client: GatewayClient,
    catalogue: watch::Sender<Option<Arc<Catalogue>>>,
    new_devices: broadcast::Sender<Arc<Device>>,
    /// Held for the duration of a REST pass; at most one in flight.
    pass_lock: Mutex<PassRecord>,
    completed_passes: AtomicU64,
}

impl Directory {
    pub fn new(client: GatewayClient) -> Self {
        let (catalogue, _) = watch::channel(None);
        let (new_devices, _) = broadcast::channel(NEW_DEVICE_CHANNEL_SIZE);
        Self {
            client,
            catalogue,
            new_devices,
            pass_lock: Mutex::new(PassRecord::default()),
            completed_passes: AtomicU64::new(0),
        }
    }

    pub fn client(&self) -> &GatewayClient {
        &self.client
    }

    // ── Discovery ────────────────────────────────────────────────────

    /// Return the catalogue, fetching it if there is none or `force_refresh`.
    ///
    /// Concurrent callers share one REST request: whoever arrives while a
    /// pass is running waits for it and gets its outcome. On failure the
    /// existing catalogue is left untouched.
    pub async fn discover(&self, force_refresh: bool) -> Result<Arc<Catalogue>, CoreError> {
        if !force_refresh {
            if let Some(catalogue) = self.current() {
                debug!("serving cached catalogue");
                return Ok(catalogue);
            }
        }

        let seen = self.completed_passes.load(Ordering::Acquire);
        let mut record = self.pass_lock.lock().await;

        if self.completed_passes.load(Ordering::Acquire) != seen {
            debug!("joined in-flight discovery pass");
            return match &record.last_failure {
                Some(failure) => Err(failure.to_error()),
                None => self.current().ok_or_else(|| CoreError::DiscoveryFailed {
                    reason: "no catalogue after discovery".into(),
                }),
            };
        }

        let outcome = match self.client.full_state().await {
            Ok(state) => self.ingest(state),
            Err(e) => Err(CoreError::discovery(e)),
        };

        record.last_failure = match &outcome {
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "discovery failed, keeping previous catalogue");
                Some(PassFailure::from_error(err))
            }
        };
        self.completed_passes.fetch_add(1, Ordering::Release);
        outcome
    }

    /// Publish a freshly fetched state and announce newly seen devices.
    ///
    /// The first catalogue has nothing to compare against and announces
    /// nothing.
    pub(crate) fn ingest(&self, state: FullState) -> Result<Arc<Catalogue>, CoreError> {
        let fresh = catalogue_from_state(state, Utc::now());
        let mut published = None;

        self.catalogue.send_modify(|slot| {
            let (next, added) = match slot.as_ref() {
                Some(previous) => {
                    let added = fresh.added_since(previous);
                    (fresh.reconciled_with(previous), added)
                }
                None => (fresh, Vec::new()),
            };
            let next = Arc::new(next);
            *slot = Some(Arc::clone(&next));
            published = Some((next, added));
        });

        let Some((catalogue, added)) = published else {
            return Err(CoreError::Internal("catalogue was not published".into()));
        };

        info!(
            devices = catalogue.len(),
            added = added.len(),
            "catalogue refreshed"
        );
        for id in &added {
            if let Some(device) = catalogue.get(id) {
                debug!(unique_id = %id, name = %device.name, "new device");
                let _ = self.new_devices.send(device);
            }
        }
        Ok(catalogue)
    }

    // ── Push merges ──────────────────────────────────────────────────

    /// Merge a push update into one entry.
    ///
    /// Unknown ids are a no-op. A snapshot is only published when a value
    /// actually changed.
    pub fn merge(
        &self,
        id: &UniqueId,
        state: Option<&Map<String, Value>>,
        config: Option<&Map<String, Value>>,
    ) -> MergeResult {
        let mut result = MergeResult::Unknown;

        self.catalogue.send_if_modified(|slot| {
            let Some(catalogue) = slot.as_ref() else {
                return false;
            };
            let Some(current) = catalogue.get(id) else {
                return false;
            };

            let mut device = (*current).clone();
            let mut changed = false;
            if let Some(state) = state {
                changed |= device.merge_state(state);
            }
            if let Some(config) = config {
                changed |= device.merge_config(config);
            }

            if !changed {
                result = MergeResult::Unchanged(current);
                return false;
            }

            let next = catalogue.with_device(device);
            if let Some(merged) = next.get(id) {
                result = MergeResult::Changed(merged);
            }
            *slot = Some(Arc::new(next));
            true
        });

        result
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// O(1) lookup in the current snapshot. Never performs I/O.
    pub fn lookup(&self, id: &UniqueId) -> Option<Arc<Device>> {
        self.catalogue.borrow().as_ref()?.get(id)
    }

    pub fn current(&self) -> Option<Arc<Catalogue>> {
        self.catalogue.borrow().clone()
    }

    /// Partition the catalogue with `filter`, refreshing first if asked.
    pub async fn list_for_selection(
        &self,
        filter: &DeviceFilter,
        force_refresh: bool,
    ) -> Result<Selection, CoreError> {
        let catalogue = self.discover(force_refresh).await?;
        let (matched, rejected) = catalogue
            .sorted()
            .into_iter()
            .partition(|device| filter.matches(device));
        Ok(Selection { matched, rejected })
    }

    /// Devices that appear in a later discovery pass.
    pub fn new_devices(&self) -> broadcast::Receiver<Arc<Device>> {
        self.new_devices.subscribe()
    }

    pub fn catalogue_stream(&self) -> CatalogueStream {
        CatalogueStream::new(self.catalogue.subscribe())
    }
}
