//! Watch-change aggregation for an offline-capable Firestore client.
//!
//! [`firestore::remote::WatchChangeAggregator`] folds document, target and
//! existence-filter changes from the watch stream into consistent
//! [`firestore::remote::RemoteEvent`]s. [`firestore::remote::ListenSession`]
//! drives one aggregator per stream session, and
//! [`firestore::local::MemoryTargetCache`] is an in-memory metadata provider.

pub mod firestore;
