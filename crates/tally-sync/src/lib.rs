pub mod engine;
pub mod store;
pub mod transport;
pub mod wire;

pub use engine::{RetryPolicy, SyncEngine, SyncOutcome};
pub use store::{ListStore, MemoryListStore, StoreError, StoredList};
pub use transport::{MemoryMesh, SyncHandler, SyncTransport, TransportError};
pub use wire::{JoinMessage, SyncRequest, SyncResponse, WireError};
