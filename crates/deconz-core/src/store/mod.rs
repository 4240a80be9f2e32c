// ── Catalogue store ──
//
// The directory (discovery + push merges) and the subscription registry.

mod catalogue;
mod directory;
mod registry;

pub use catalogue::{Catalogue, GatewayInfo};
pub use directory::{Directory, MergeResult, Selection};
pub use registry::{DispatchReport, StateListener, SubscriptionRegistry};
