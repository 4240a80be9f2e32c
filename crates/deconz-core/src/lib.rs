//! Device directory and state fan-out between `deconz-api` and consumers.
//!
//! - **[`Gateway`]**: facade owning the whole connection lifecycle.
//!   [`connect()`](Gateway::connect) runs the initial discovery, then spawns
//!   the discovery poll, the push socket, and the bridge task that feeds
//!   push frames through the router. [`Gateway::oneshot()`] is the
//!   request-response mode used by single CLI invocations.
//!
//! - **[`Directory`]**: the device catalogue. Immutable [`Catalogue`]
//!   snapshots in a `tokio::sync::watch` channel; coalesced REST discovery,
//!   key-wise push merges, new-device announcements.
//!
//! - **[`EventRouter`]** and **[`SubscriptionRegistry`]**: resolve each push
//!   frame to a device, merge it, and deliver a [`DeviceUpdate`] to every
//!   subscriber of that device.
//!
//! - **Streams** ([`CatalogueStream`], [`DeviceUpdates`]): the consumer side
//!   of catalogue snapshots and per-device updates.

pub mod config;
mod convert;
pub mod error;
pub mod gateway;
pub mod model;
pub mod router;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{GatewayConfig, MIN_POLLING_INTERVAL, TlsVerification};
pub use error::CoreError;
pub use gateway::{ConnectionState, Gateway};
pub use model::{Device, DeviceKind, DeviceUpdate, SubscriberId, UniqueId};
pub use router::{EventRouter, RouteOutcome};
pub use store::{
    Catalogue, Directory, DispatchReport, GatewayInfo, MergeResult, Selection, StateListener,
    SubscriptionRegistry,
};
pub use stream::{CatalogueStream, DeviceFilter, DeviceUpdates};

// Socket types consumers see through `Gateway::socket_events`.
pub use deconz_api::{SocketEvent, SocketState};
