pub mod listen_session;
pub mod remote_event;
pub mod remote_syncer;
pub mod target_state;
pub mod watch_change;
pub mod watch_change_aggregator;

pub use listen_session::{ListenSession, WatchStream};
pub use remote_event::{RemoteEvent, TargetChange};
pub use remote_syncer::RemoteSyncer;
pub use target_state::{DocumentChangeKind, TargetState};
pub use watch_change::{
    DocumentWatchChange, ExistenceFilterWatchChange, WatchChange, WatchTargetChange,
    WatchTargetChangeState,
};
pub use watch_change_aggregator::{TargetMetadataProvider, WatchChangeAggregator};
