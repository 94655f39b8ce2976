use crate::firestore::error::{FirestoreError, FirestoreResult};
use crate::firestore::remote::remote_event::RemoteEvent;

/// Receives the output of a [`ListenSession`](crate::firestore::remote::ListenSession).
///
/// Implementations typically apply the event to local storage (which in turn
/// updates the metadata provider) and notify query listeners.
pub trait RemoteSyncer: Send + Sync {
    /// Applies a remote event produced at a global consistency point.
    fn apply_remote_event(&self, event: RemoteEvent) -> FirestoreResult<()>;

    /// Signals that the backend rejected a listen. The target has already
    /// been forgotten by the session.
    fn reject_listen(&self, target_id: i32, error: FirestoreError) -> FirestoreResult<()>;
}
