use std::collections::{BTreeMap, BTreeSet};

use crate::firestore::local::QueryPurpose;
use crate::firestore::model::{ByteString, DocumentKey, MaybeDocument, SnapshotVersion};

/// Consistent snapshot of everything the watch stream reported up to
/// `snapshot_version`. Owns all of its data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteEvent {
    pub snapshot_version: SnapshotVersion,
    pub target_changes: BTreeMap<i32, TargetChange>,
    /// Targets that must be dropped and re-listened, with the purpose to use
    /// for the new listen.
    pub target_resets: BTreeMap<i32, QueryPurpose>,
    pub document_updates: BTreeMap<DocumentKey, MaybeDocument>,
    /// Documents only referenced by limbo resolution targets.
    pub resolved_limbo_documents: BTreeSet<DocumentKey>,
}

impl RemoteEvent {
    pub fn is_empty(&self) -> bool {
        self.target_changes.is_empty()
            && self.document_updates.is_empty()
            && self.target_resets.is_empty()
            && self.resolved_limbo_documents.is_empty()
    }
}

/// Per-target summary of the changes included in a [`RemoteEvent`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetChange {
    pub resume_token: ByteString,
    pub current: bool,
    pub added_documents: BTreeSet<DocumentKey>,
    pub modified_documents: BTreeSet<DocumentKey>,
    pub removed_documents: BTreeSet<DocumentKey>,
}

impl TargetChange {
    pub fn has_document_changes(&self) -> bool {
        !(self.added_documents.is_empty()
            && self.modified_documents.is_empty()
            && self.removed_documents.is_empty())
    }
}
