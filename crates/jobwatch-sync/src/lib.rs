pub mod config;
pub mod memory;
pub mod mux;
pub mod reconciler;
pub mod registry;
pub mod source;
pub mod store;
pub mod sync;
pub mod ticker;

pub use config::{RebuildStrategy, SyncConfig};
pub use memory::MemoryTransport;
pub use mux::ChannelMultiplexer;
pub use reconciler::{PullOutcome, Reconciler};
pub use registry::{Claim, GuardTicket, SubscriptionRegistry};
pub use source::{PushTransport, StatusSource};
pub use store::{ChangeKind, JobSlot, StatusStore, StoreChange};
pub use sync::{StatusSync, SubscribeOutcome};
pub use ticker::ElapsedTicker;
