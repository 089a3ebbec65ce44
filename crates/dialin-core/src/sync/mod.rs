//! Sync protocol client: wire payloads, transport, watermark and the round
//! coordinator.

mod coordinator;
mod transport;
mod watermark;
pub mod wire;

pub use coordinator::{SyncCoordinator, SyncError, SyncOutcome, SyncPhase, SyncReport};
pub use transport::{HttpTransport, SyncTransport, TransportError, TransportResult};
pub use watermark::Watermark;
pub use wire::{PullData, PullResponse, PushCounts, PushRequest, PushResponse, PushResults, WireRecord};
