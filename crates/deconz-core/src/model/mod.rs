// ── Domain model ──

pub mod device;
pub mod unique_id;

pub use device::{Device, DeviceKind, DeviceUpdate};
pub use unique_id::{SubscriberId, UniqueId};
