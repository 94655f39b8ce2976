pub mod error;
pub mod local;
pub mod model;
pub mod remote;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{FirestoreError, FirestoreErrorCode, FirestoreResult};
pub use local::{MemoryTargetCache, QueryPurpose, TargetData};
pub use remote::{ListenSession, RemoteEvent, WatchChangeAggregator};
