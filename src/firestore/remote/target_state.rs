use std::collections::HashMap;

use crate::firestore::model::{ByteString, DocumentKey};
use crate::firestore::remote::remote_event::TargetChange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentChangeKind {
    Added,
    Modified,
    Removed,
}

/// Bookkeeping for one watch target between two remote events.
#[derive(Debug, Clone)]
pub struct TargetState {
    /// Add/remove requests sent to the backend that have not been
    /// acknowledged yet. While nonzero, changes for the target are ignored.
    outstanding_responses: i32,
    resume_token: ByteString,
    current: bool,
    document_changes: HashMap<DocumentKey, DocumentChangeKind>,
    // Starts out true so that a newly tracked target always shows up in the
    // next remote event.
    has_pending_changes: bool,
    // Token, current flag or a fresh state changed since the last flush.
    // Document bookkeeping alone can net out to nothing.
    has_metadata_changes: bool,
    // A tombstone was already synthesized for the looked-up document.
    synthesized_delete: bool,
}

impl Default for TargetState {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetState {
    pub fn new() -> Self {
        Self {
            outstanding_responses: 0,
            resume_token: ByteString::empty(),
            current: false,
            document_changes: HashMap::new(),
            has_pending_changes: true,
            has_metadata_changes: true,
            synthesized_delete: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.outstanding_responses != 0
    }

    pub fn is_current(&self) -> bool {
        self.current
    }

    pub fn resume_token(&self) -> &ByteString {
        &self.resume_token
    }

    pub fn has_pending_changes(&self) -> bool {
        self.has_pending_changes
    }

    /// Whether the next remote event needs a change entry for this target.
    /// A document that entered and left the target within one window is not
    /// reportable on its own.
    pub fn has_reportable_changes(&self) -> bool {
        self.has_pending_changes && (self.has_metadata_changes || !self.document_changes.is_empty())
    }

    pub fn has_synthesized_delete(&self) -> bool {
        self.synthesized_delete
    }

    pub fn mark_delete_synthesized(&mut self) {
        self.synthesized_delete = true;
    }

    pub fn forget_synthesized_delete(&mut self) {
        self.synthesized_delete = false;
    }

    /// Pending `Added` minus pending `Removed` changes.
    pub fn net_document_delta(&self) -> i64 {
        self.document_changes
            .values()
            .map(|kind| match kind {
                DocumentChangeKind::Added => 1,
                DocumentChangeKind::Modified => 0,
                DocumentChangeKind::Removed => -1,
            })
            .sum()
    }

    /// Empty tokens carry no resumption point and leave the state untouched.
    pub fn update_resume_token(&mut self, resume_token: ByteString) {
        if !resume_token.is_empty() {
            self.has_pending_changes = true;
            self.has_metadata_changes = true;
            self.resume_token = resume_token;
        }
    }

    pub fn to_target_change(&self) -> TargetChange {
        let mut change = TargetChange {
            resume_token: self.resume_token.clone(),
            current: self.current,
            ..TargetChange::default()
        };

        for (key, kind) in &self.document_changes {
            let bucket = match kind {
                DocumentChangeKind::Added => &mut change.added_documents,
                DocumentChangeKind::Modified => &mut change.modified_documents,
                DocumentChangeKind::Removed => &mut change.removed_documents,
            };
            bucket.insert(key.clone());
        }

        change
    }

    pub fn clear_pending_changes(&mut self) {
        self.has_pending_changes = false;
        self.has_metadata_changes = false;
        self.document_changes.clear();
    }

    pub fn record_pending_target_request(&mut self) {
        self.outstanding_responses += 1;
    }

    pub fn record_target_response(&mut self) {
        if self.outstanding_responses == 0 {
            log::warn!("received a watch target response with no outstanding request");
            return;
        }
        self.outstanding_responses -= 1;
    }

    pub fn mark_current(&mut self) {
        self.has_pending_changes = true;
        self.has_metadata_changes = true;
        self.current = true;
    }

    pub fn add_document_change(&mut self, key: DocumentKey, kind: DocumentChangeKind) {
        self.has_pending_changes = true;
        self.document_changes.insert(key, kind);
    }

    pub fn remove_document_change(&mut self, key: &DocumentKey) {
        self.has_pending_changes = true;
        self.document_changes.remove(key);
    }
}
