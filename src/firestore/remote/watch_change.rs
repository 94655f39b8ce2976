use crate::firestore::error::FirestoreError;
use crate::firestore::model::{ByteString, DocumentKey, MaybeDocument};

/// A single decoded message from the watch stream.
#[derive(Debug, Clone)]
pub enum WatchChange {
    Document(DocumentWatchChange),
    Target(WatchTargetChange),
    ExistenceFilter(ExistenceFilterWatchChange),
}

/// A document entered, changed in, or left one or more targets.
#[derive(Debug, Clone)]
pub struct DocumentWatchChange {
    /// Targets whose result set now includes (or, for a tombstone, no longer
    /// includes) the document.
    pub updated_target_ids: Vec<i32>,
    /// Targets the document no longer matches.
    pub removed_target_ids: Vec<i32>,
    pub document_key: DocumentKey,
    /// The new state of the document. `None` when the server only reports
    /// that the document left the removed targets.
    pub new_document: Option<MaybeDocument>,
}

impl DocumentWatchChange {
    pub fn new(
        updated_target_ids: Vec<i32>,
        removed_target_ids: Vec<i32>,
        document_key: DocumentKey,
        new_document: Option<MaybeDocument>,
    ) -> Self {
        Self {
            updated_target_ids,
            removed_target_ids,
            document_key,
            new_document,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTargetChangeState {
    NoChange,
    Added,
    Removed,
    Current,
    Reset,
}

/// Lifecycle signal for a set of targets. An empty `target_ids` list
/// addresses every target the aggregator is tracking.
#[derive(Debug, Clone)]
pub struct WatchTargetChange {
    pub state: WatchTargetChangeState,
    pub target_ids: Vec<i32>,
    pub resume_token: ByteString,
    pub cause: Option<FirestoreError>,
}

impl WatchTargetChange {
    pub fn new(state: WatchTargetChangeState, target_ids: Vec<i32>) -> Self {
        Self {
            state,
            target_ids,
            resume_token: ByteString::empty(),
            cause: None,
        }
    }

    pub fn with_resume_token(mut self, resume_token: ByteString) -> Self {
        self.resume_token = resume_token;
        self
    }

    pub fn with_cause(mut self, cause: FirestoreError) -> Self {
        self.cause = Some(cause);
        self
    }
}

/// Server assertion of how many documents currently match `target_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistenceFilterWatchChange {
    pub target_id: i32,
    pub count: usize,
}

impl ExistenceFilterWatchChange {
    pub fn new(target_id: i32, count: usize) -> Self {
        Self { target_id, count }
    }
}
