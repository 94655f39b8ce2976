use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::firestore::error::{internal_error, FirestoreResult};
use crate::firestore::local::{QueryPurpose, TargetData};
use crate::firestore::model::{DeletedDocument, Document, DocumentKey, MaybeDocument, SnapshotVersion};
use crate::firestore::remote::remote_event::{RemoteEvent, TargetChange};
use crate::firestore::remote::target_state::{DocumentChangeKind, TargetState};
use crate::firestore::remote::watch_change::{
    DocumentWatchChange, ExistenceFilterWatchChange, WatchChange, WatchTargetChange,
    WatchTargetChangeState,
};

/// Provides metadata about active targets so the aggregator can reason about
/// existing documents.
///
/// Both lookups must reflect the last applied remote event, not changes that
/// are still being aggregated.
pub trait TargetMetadataProvider: Send + Sync {
    /// Keys of the documents the target matched as of the last applied
    /// remote event.
    fn get_remote_keys(&self, target_id: i32) -> BTreeSet<DocumentKey>;

    /// Target data for a currently listened target, `None` once the target
    /// is no longer listened to.
    fn get_target_data(&self, target_id: i32) -> Option<TargetData>;
}

/// Folds watch changes into [`RemoteEvent`]s that are consistent across all
/// targets.
///
/// Changes are buffered until [`create_remote_event`] is called at a global
/// consistency point; the buffers are then handed over to the event and the
/// aggregator starts the next window empty.
///
/// [`create_remote_event`]: WatchChangeAggregator::create_remote_event
pub struct WatchChangeAggregator<P>
where
    P: TargetMetadataProvider + ?Sized,
{
    metadata: Arc<P>,
    target_states: HashMap<i32, TargetState>,
    pending_document_updates: BTreeMap<DocumentKey, MaybeDocument>,
    pending_document_target_mapping: BTreeMap<DocumentKey, BTreeSet<i32>>,
    pending_target_resets: BTreeMap<i32, QueryPurpose>,
}

impl<P> WatchChangeAggregator<P>
where
    P: TargetMetadataProvider + ?Sized,
{
    pub fn new(metadata: Arc<P>) -> Self {
        Self {
            metadata,
            target_states: HashMap::new(),
            pending_document_updates: BTreeMap::new(),
            pending_document_target_mapping: BTreeMap::new(),
            pending_target_resets: BTreeMap::new(),
        }
    }

    pub fn handle_watch_change(&mut self, change: WatchChange) -> FirestoreResult<()> {
        match change {
            WatchChange::Document(change) => {
                self.handle_document_change(change);
                Ok(())
            }
            WatchChange::Target(change) => self.handle_target_change(&change),
            WatchChange::ExistenceFilter(filter) => self.handle_existence_filter(filter),
        }
    }

    pub fn handle_document_change(&mut self, change: DocumentWatchChange) {
        let DocumentWatchChange {
            updated_target_ids,
            removed_target_ids,
            document_key,
            new_document,
        } = change;

        for target_id in updated_target_ids {
            match &new_document {
                Some(MaybeDocument::Document(document)) => {
                    self.add_document_to_target(target_id, document.clone());
                }
                Some(deleted @ MaybeDocument::Deleted(_)) => {
                    self.remove_document_from_target(target_id, &document_key, Some(deleted.clone()));
                }
                None => self.remove_document_from_target(target_id, &document_key, None),
            }
        }

        for target_id in removed_target_ids {
            self.remove_document_from_target(target_id, &document_key, new_document.clone());
        }
    }

    pub fn handle_target_change(&mut self, change: &WatchTargetChange) -> FirestoreResult<()> {
        if let Some(cause) = change.cause.as_ref() {
            return Err(internal_error(format!(
                "watch target change for {:?} carries an error and must be handled by the listen session: {cause}",
                change.target_ids
            )));
        }

        for target_id in self.target_ids_for(change) {
            match change.state {
                WatchTargetChangeState::NoChange => {
                    if self.is_active_target(target_id) {
                        self.ensure_target_state(target_id)
                            .update_resume_token(change.resume_token.clone());
                    }
                }
                WatchTargetChangeState::Added => {
                    let state = self.ensure_target_state(target_id);
                    state.record_target_response();
                    if !state.is_pending() {
                        // Anything buffered before the backend acknowledged the
                        // target belongs to a previous incarnation of it.
                        state.clear_pending_changes();
                        state.forget_synthesized_delete();
                    }
                    state.update_resume_token(change.resume_token.clone());
                }
                WatchTargetChangeState::Removed => {
                    let state = self.ensure_target_state(target_id);
                    state.record_target_response();
                    if !state.is_pending() {
                        self.remove_target(target_id);
                    }
                }
                WatchTargetChangeState::Current => {
                    if self.is_active_target(target_id) {
                        let state = self.ensure_target_state(target_id);
                        state.mark_current();
                        state.update_resume_token(change.resume_token.clone());
                    }
                }
                WatchTargetChangeState::Reset => {
                    if self.is_active_target(target_id) {
                        log::debug!("watch reset target {target_id}");
                        self.reset_target(target_id);
                        self.ensure_target_state(target_id)
                            .update_resume_token(change.resume_token.clone());
                    }
                }
            }
        }

        Ok(())
    }

    pub fn handle_existence_filter(&mut self, filter: ExistenceFilterWatchChange) -> FirestoreResult<()> {
        let target_id = filter.target_id;
        let expected_count = filter.count;

        let Some(target_data) = self.target_data_for_active_target(target_id) else {
            log::debug!("ignoring existence filter for inactive target {target_id}");
            return Ok(());
        };

        if let Some(key) = target_data.target.document_key() {
            match expected_count {
                0 => {
                    // The backend says the looked-up document does not exist.
                    // Apply the deletion now so other targets cannot keep
                    // surfacing a stale copy until the lookup resolves.
                    let deleted = DeletedDocument::new(key.clone(), SnapshotVersion::none());
                    self.remove_document_from_target(target_id, &key, Some(deleted.into()));
                }
                1 => {}
                count => {
                    return Err(internal_error(format!(
                        "single document existence filter for target {target_id} reported {count} documents"
                    )));
                }
            }
            return Ok(());
        }

        let current_count = self.current_document_count_for_target(target_id);
        if current_count != expected_count as i64 {
            log::debug!(
                "existence filter mismatch for target {target_id}: local {current_count}, backend {expected_count}"
            );
            self.reset_target(target_id);
            self.pending_target_resets
                .insert(target_id, QueryPurpose::ExistenceFilterMismatch);
        }
        Ok(())
    }

    /// Produces the remote event for everything aggregated so far and clears
    /// the document and reset buffers.
    pub fn create_remote_event(&mut self, snapshot_version: SnapshotVersion) -> RemoteEvent {
        let mut target_changes: BTreeMap<i32, TargetChange> = BTreeMap::new();

        let target_ids: Vec<i32> = self.target_states.keys().copied().collect();
        for target_id in target_ids {
            let Some(target_data) = self.target_data_for_active_target(target_id) else {
                continue;
            };

            let awaiting_lookup = self
                .target_states
                .get(&target_id)
                .is_some_and(|state| state.is_current() && !state.has_synthesized_delete());

            if awaiting_lookup {
                if let Some(key) = target_data.target.document_key() {
                    // A current document lookup that never received the
                    // document means it does not exist.
                    if !self.pending_document_updates.contains_key(&key)
                        && !self.target_contains_document(target_id, &key)
                    {
                        self.synthesize_delete(target_id, key, snapshot_version);
                    }
                }
            }

            if let Some(state) = self.target_states.get_mut(&target_id) {
                if state.has_pending_changes() {
                    if state.has_reportable_changes() {
                        target_changes.insert(target_id, state.to_target_change());
                    }
                    state.clear_pending_changes();
                }
            }
        }

        let resolved_limbo_documents = self.resolved_limbo_documents();
        if !resolved_limbo_documents.is_empty() {
            log::debug!(
                "remote event at {snapshot_version} resolves {} limbo document(s)",
                resolved_limbo_documents.len()
            );
        }

        RemoteEvent {
            snapshot_version,
            target_changes,
            target_resets: std::mem::take(&mut self.pending_target_resets),
            document_updates: std::mem::take(&mut self.pending_document_updates),
            resolved_limbo_documents,
        }
    }

    /// Records that `document` matches the target.
    pub fn add_document_to_target(&mut self, target_id: i32, document: Document) {
        if !self.is_active_target(target_id) {
            log::debug!("ignoring {} for inactive target {target_id}", document.key);
            return;
        }

        let kind = if self.target_contains_document(target_id, &document.key) {
            DocumentChangeKind::Modified
        } else {
            DocumentChangeKind::Added
        };

        let key = document.key.clone();
        let state = self.ensure_target_state(target_id);
        state.add_document_change(key.clone(), kind);
        state.forget_synthesized_delete();
        self.pending_document_target_mapping
            .entry(key.clone())
            .or_default()
            .insert(target_id);
        self.pending_document_updates
            .insert(key, MaybeDocument::Document(document));
    }

    /// Records that `key` no longer matches the target. `updated_document`
    /// carries the new document state when the backend sent one.
    pub fn remove_document_from_target(
        &mut self,
        target_id: i32,
        key: &DocumentKey,
        updated_document: Option<MaybeDocument>,
    ) {
        if !self.is_active_target(target_id) {
            log::debug!("ignoring removal of {key} from inactive target {target_id}");
            return;
        }

        let was_committed = self.target_contains_document(target_id, key);
        let state = self.ensure_target_state(target_id);
        if was_committed {
            state.add_document_change(key.clone(), DocumentChangeKind::Removed);
        } else {
            // The document entered and left the target within this window.
            state.remove_document_change(key);
        }

        self.pending_document_target_mapping
            .entry(key.clone())
            .or_default()
            .insert(target_id);

        if let Some(document) = updated_document {
            self.pending_document_updates.insert(key.clone(), document);
        }
    }

    pub fn record_pending_target_request(&mut self, target_id: i32) {
        self.ensure_target_state(target_id)
            .record_pending_target_request();
    }

    /// Forgets the target. Buffered changes for it are dropped.
    pub fn remove_target(&mut self, target_id: i32) {
        self.target_states.remove(&target_id);
    }

    pub fn target_state(&self, target_id: i32) -> Option<&TargetState> {
        self.target_states.get(&target_id)
    }

    pub fn target_contains_document(&self, target_id: i32, key: &DocumentKey) -> bool {
        self.metadata.get_remote_keys(target_id).contains(key)
    }

    pub fn is_active_target(&self, target_id: i32) -> bool {
        self.target_data_for_active_target(target_id).is_some()
    }

    /// Target data for `target_id` unless the target is unknown to the
    /// metadata provider or still waiting for the backend to acknowledge a
    /// request.
    pub fn target_data_for_active_target(&self, target_id: i32) -> Option<TargetData> {
        let pending = self
            .target_states
            .get(&target_id)
            .is_some_and(TargetState::is_pending);
        if pending {
            return None;
        }
        self.metadata.get_target_data(target_id)
    }

    fn target_ids_for(&self, change: &WatchTargetChange) -> Vec<i32> {
        if change.target_ids.is_empty() {
            self.target_states.keys().copied().collect()
        } else {
            change.target_ids.clone()
        }
    }

    fn ensure_target_state(&mut self, target_id: i32) -> &mut TargetState {
        self.target_states.entry(target_id).or_default()
    }

    /// Reports the looked-up document as removed from the target, once per
    /// incarnation of the target.
    fn synthesize_delete(&mut self, target_id: i32, key: DocumentKey, snapshot_version: SnapshotVersion) {
        log::debug!("synthesizing delete of {key} for document lookup target {target_id}");
        let state = self.ensure_target_state(target_id);
        state.add_document_change(key.clone(), DocumentChangeKind::Removed);
        state.mark_delete_synthesized();
        self.pending_document_target_mapping
            .entry(key.clone())
            .or_default()
            .insert(target_id);
        let deleted = DeletedDocument::new(key.clone(), snapshot_version);
        self.pending_document_updates.insert(key, deleted.into());
    }

    fn current_document_count_for_target(&self, target_id: i32) -> i64 {
        let committed = self.metadata.get_remote_keys(target_id).len() as i64;
        let delta = self
            .target_states
            .get(&target_id)
            .map_or(0, TargetState::net_document_delta);
        committed + delta
    }

    /// Starts the target over: buffered changes and the resume token are
    /// dropped and every committed document is reported as removed unless the
    /// backend sends it again before the next remote event.
    fn reset_target(&mut self, target_id: i32) {
        self.target_states.insert(target_id, TargetState::new());

        let orphaned: Vec<DocumentKey> = self
            .pending_document_target_mapping
            .iter()
            .filter(|(_, targets)| targets.len() == 1 && targets.contains(&target_id))
            .map(|(key, _)| key.clone())
            .collect();
        for key in orphaned {
            self.pending_document_target_mapping.remove(&key);
            self.pending_document_updates.remove(&key);
        }
        for targets in self.pending_document_target_mapping.values_mut() {
            targets.remove(&target_id);
        }

        for key in self.metadata.get_remote_keys(target_id) {
            self.remove_document_from_target(target_id, &key, None);
        }
    }

    fn resolved_limbo_documents(&mut self) -> BTreeSet<DocumentKey> {
        let mapping = std::mem::take(&mut self.pending_document_target_mapping);
        mapping
            .into_iter()
            .filter(|(_, targets)| {
                targets.iter().all(|target_id| {
                    self.target_data_for_active_target(*target_id)
                        .map_or(true, |data| data.purpose == QueryPurpose::LimboResolution)
                })
            })
            .map(|(key, _)| key)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::model::ByteString;
    use crate::firestore::test_support::{
        deleted_doc, doc, key, version, TestTargetMetadata,
    };

    const TARGET: i32 = 1;

    fn aggregator(metadata: &Arc<TestTargetMetadata>) -> WatchChangeAggregator<TestTargetMetadata> {
        WatchChangeAggregator::new(Arc::clone(metadata))
    }

    fn add_doc(aggregator: &mut WatchChangeAggregator<TestTargetMetadata>, targets: Vec<i32>, path: &str) {
        aggregator.handle_document_change(DocumentWatchChange::new(
            targets,
            vec![],
            key(path),
            Some(doc(path, 1).into()),
        ));
    }

    fn target_change(state: WatchTargetChangeState, targets: Vec<i32>, token: &[u8]) -> WatchChange {
        WatchChange::Target(
            WatchTargetChange::new(state, targets).with_resume_token(ByteString::from(token)),
        )
    }

    #[test]
    fn aggregates_added_documents() {
        let metadata = Arc::new(TestTargetMetadata::new().with_query(TARGET, "rooms"));
        let mut aggregator = aggregator(&metadata);

        add_doc(&mut aggregator, vec![TARGET], "rooms/a");
        let event = aggregator.create_remote_event(version(1));

        assert_eq!(event.snapshot_version, version(1));
        let change = &event.target_changes[&TARGET];
        assert!(change.added_documents.contains(&key("rooms/a")));
        assert!(change.modified_documents.is_empty());
        assert!(event.document_updates[&key("rooms/a")].exists());
        assert!(event.resolved_limbo_documents.is_empty());
    }

    #[test]
    fn second_event_without_input_is_empty() {
        let metadata = Arc::new(
            TestTargetMetadata::new()
                .with_query(TARGET, "rooms")
                .with_query(2, "rooms")
                .with_limbo(3, "rooms/b")
                .with_remote_keys(3, &["rooms/b"]),
        );
        let mut aggregator = aggregator(&metadata);
        add_doc(&mut aggregator, vec![TARGET, 2], "rooms/a");
        add_doc(&mut aggregator, vec![3], "rooms/b");
        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Current, vec![], b"t"))
            .unwrap();
        aggregator
            .handle_existence_filter(ExistenceFilterWatchChange::new(2, 7))
            .unwrap();

        let first = aggregator.create_remote_event(version(1));
        assert!(!first.is_empty());

        let second = aggregator.create_remote_event(version(2));
        assert!(second.target_changes.is_empty());
        assert!(second.target_resets.is_empty());
        assert!(second.document_updates.is_empty());
        assert!(second.resolved_limbo_documents.is_empty());
    }

    #[test]
    fn update_of_committed_document_is_modified_once() {
        let metadata = Arc::new(
            TestTargetMetadata::new()
                .with_query(TARGET, "rooms")
                .with_remote_keys(TARGET, &["rooms/a"]),
        );
        let mut aggregator = aggregator(&metadata);

        add_doc(&mut aggregator, vec![TARGET], "rooms/a");
        aggregator.handle_document_change(DocumentWatchChange::new(
            vec![TARGET],
            vec![],
            key("rooms/a"),
            Some(doc("rooms/a", 2).into()),
        ));

        let event = aggregator.create_remote_event(version(2));
        let change = &event.target_changes[&TARGET];
        assert_eq!(change.modified_documents.len(), 1);
        assert!(change.added_documents.is_empty());
        assert_eq!(event.document_updates[&key("rooms/a")].version(), version(2));
    }

    #[test]
    fn added_then_updated_document_is_added_once() {
        let metadata = Arc::new(TestTargetMetadata::new().with_query(TARGET, "rooms"));
        let mut aggregator = aggregator(&metadata);

        add_doc(&mut aggregator, vec![TARGET], "rooms/a");
        add_doc(&mut aggregator, vec![TARGET], "rooms/a");

        let change = aggregator.create_remote_event(version(1)).target_changes[&TARGET].clone();
        assert_eq!(change.added_documents.len(), 1);
        assert!(change.modified_documents.is_empty());
        assert!(change.removed_documents.is_empty());
    }

    #[test]
    fn transient_add_and_remove_cancel_out() {
        let metadata = Arc::new(TestTargetMetadata::new().with_query(TARGET, "rooms"));
        let mut aggregator = aggregator(&metadata);
        aggregator.record_pending_target_request(TARGET);
        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Added, vec![TARGET], b""))
            .unwrap();
        aggregator.create_remote_event(version(1));

        add_doc(&mut aggregator, vec![TARGET], "rooms/a");
        aggregator.handle_document_change(DocumentWatchChange::new(
            vec![],
            vec![TARGET],
            key("rooms/a"),
            None,
        ));

        let event = aggregator.create_remote_event(version(2));
        assert!(!event.target_changes.contains_key(&TARGET));
        assert!(event.resolved_limbo_documents.is_empty());
    }

    #[test]
    fn update_without_document_removes_committed_key() {
        let metadata = Arc::new(
            TestTargetMetadata::new()
                .with_query(TARGET, "rooms")
                .with_remote_keys(TARGET, &["rooms/a"]),
        );
        let mut aggregator = aggregator(&metadata);
        aggregator.handle_document_change(DocumentWatchChange::new(
            vec![TARGET],
            vec![],
            key("rooms/a"),
            None,
        ));

        let event = aggregator.create_remote_event(version(2));
        assert!(event.target_changes[&TARGET].removed_documents.contains(&key("rooms/a")));
        assert!(event.document_updates.is_empty());
    }

    #[test]
    fn tombstone_for_committed_document_is_removed() {
        let metadata = Arc::new(
            TestTargetMetadata::new()
                .with_query(TARGET, "rooms")
                .with_remote_keys(TARGET, &["rooms/a"]),
        );
        let mut aggregator = aggregator(&metadata);
        aggregator.handle_document_change(DocumentWatchChange::new(
            vec![TARGET],
            vec![],
            key("rooms/a"),
            Some(deleted_doc("rooms/a", 3).into()),
        ));

        let event = aggregator.create_remote_event(version(3));
        assert!(event.target_changes[&TARGET]
            .removed_documents
            .contains(&key("rooms/a")));
        assert!(!event.document_updates[&key("rooms/a")].exists());
    }

    #[test]
    fn removed_targets_receive_removal_even_for_live_document() {
        let metadata = Arc::new(
            TestTargetMetadata::new()
                .with_query(TARGET, "rooms")
                .with_query(2, "rooms")
                .with_remote_keys(2, &["rooms/a"]),
        );
        let mut aggregator = aggregator(&metadata);
        aggregator.handle_document_change(DocumentWatchChange::new(
            vec![TARGET],
            vec![2],
            key("rooms/a"),
            Some(doc("rooms/a", 4).into()),
        ));

        let event = aggregator.create_remote_event(version(4));
        assert!(event.target_changes[&TARGET].added_documents.contains(&key("rooms/a")));
        assert!(event.target_changes[&2].removed_documents.contains(&key("rooms/a")));
        assert!(event.document_updates[&key("rooms/a")].exists());
    }

    #[test]
    fn ignores_changes_for_unknown_targets() {
        let metadata = Arc::new(TestTargetMetadata::new().with_query(TARGET, "rooms"));
        let mut aggregator = aggregator(&metadata);
        aggregator.create_remote_event(version(1));

        add_doc(&mut aggregator, vec![9], "rooms/a");

        let event = aggregator.create_remote_event(version(2));
        assert!(event.is_empty());
    }

    #[test]
    fn pending_targets_are_excluded() {
        let metadata = Arc::new(TestTargetMetadata::new().with_query(TARGET, "rooms"));
        let mut aggregator = aggregator(&metadata);
        aggregator.record_pending_target_request(TARGET);

        assert!(!aggregator.is_active_target(TARGET));
        assert!(aggregator.target_data_for_active_target(TARGET).is_none());

        add_doc(&mut aggregator, vec![TARGET], "rooms/a");
        let event = aggregator.create_remote_event(version(1));
        assert!(event.target_changes.is_empty());
        assert!(event.document_updates.is_empty());

        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Added, vec![TARGET], b""))
            .unwrap();
        assert!(aggregator.is_active_target(TARGET));
        add_doc(&mut aggregator, vec![TARGET], "rooms/a");
        let event = aggregator.create_remote_event(version(2));
        assert!(event.target_changes[&TARGET].added_documents.contains(&key("rooms/a")));
    }

    #[test]
    fn target_stays_pending_until_every_request_is_acknowledged() {
        let metadata = Arc::new(TestTargetMetadata::new().with_query(TARGET, "rooms"));
        let mut aggregator = aggregator(&metadata);
        // listen, unlisten, listen again before the backend answered.
        aggregator.record_pending_target_request(TARGET);
        aggregator.record_pending_target_request(TARGET);
        aggregator.record_pending_target_request(TARGET);

        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Added, vec![TARGET], b""))
            .unwrap();
        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Removed, vec![TARGET], b""))
            .unwrap();
        assert!(!aggregator.is_active_target(TARGET));
        assert!(aggregator.target_state(TARGET).is_some());

        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Added, vec![TARGET], b"r"))
            .unwrap();
        assert!(aggregator.is_active_target(TARGET));
        assert_eq!(
            aggregator.target_state(TARGET).unwrap().resume_token().as_slice(),
            b"r"
        );
    }

    #[test]
    fn removed_acknowledgement_drops_target_state() {
        let metadata = Arc::new(TestTargetMetadata::new().with_query(TARGET, "rooms"));
        let mut aggregator = aggregator(&metadata);
        add_doc(&mut aggregator, vec![TARGET], "rooms/a");
        aggregator.record_pending_target_request(TARGET);

        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Removed, vec![TARGET], b""))
            .unwrap();

        assert!(aggregator.target_state(TARGET).is_none());
        let event = aggregator.create_remote_event(version(1));
        assert!(event.target_changes.is_empty());
    }

    #[test]
    fn target_change_with_cause_is_rejected() {
        let metadata = Arc::new(TestTargetMetadata::new().with_query(TARGET, "rooms"));
        let mut aggregator = aggregator(&metadata);
        let change = WatchTargetChange::new(WatchTargetChangeState::Removed, vec![TARGET])
            .with_cause(crate::firestore::error::permission_denied("nope"));

        let err = aggregator.handle_target_change(&change).unwrap_err();
        assert_eq!(err.code_str(), "firestore/internal");
    }

    #[test]
    fn current_and_resume_token_are_reported() {
        let metadata = Arc::new(TestTargetMetadata::new().with_query(TARGET, "rooms"));
        let mut aggregator = aggregator(&metadata);
        aggregator.create_remote_event(version(1));

        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Current, vec![TARGET], b"abc"))
            .unwrap();

        let event = aggregator.create_remote_event(version(2));
        let change = &event.target_changes[&TARGET];
        assert!(change.current);
        assert_eq!(change.resume_token.as_slice(), b"abc");
        assert!(!change.has_document_changes());
    }

    #[test]
    fn no_change_with_empty_token_does_not_dirty_target() {
        let metadata = Arc::new(TestTargetMetadata::new().with_query(TARGET, "rooms"));
        let mut aggregator = aggregator(&metadata);
        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Current, vec![TARGET], b"first"))
            .unwrap();
        aggregator.create_remote_event(version(1));

        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::NoChange, vec![], b""))
            .unwrap();
        assert!(aggregator.create_remote_event(version(2)).target_changes.is_empty());
        assert_eq!(
            aggregator.target_state(TARGET).unwrap().resume_token().as_slice(),
            b"first"
        );

        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::NoChange, vec![], b"next"))
            .unwrap();
        let event = aggregator.create_remote_event(version(3));
        assert_eq!(event.target_changes[&TARGET].resume_token.as_slice(), b"next");
    }

    #[test]
    fn reset_reports_committed_documents_as_removed() {
        let metadata = Arc::new(
            TestTargetMetadata::new()
                .with_query(TARGET, "rooms")
                .with_query(2, "rooms")
                .with_remote_keys(TARGET, &["rooms/a", "rooms/b"]),
        );
        let mut aggregator = aggregator(&metadata);
        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Current, vec![TARGET], b"old"))
            .unwrap();
        add_doc(&mut aggregator, vec![TARGET], "rooms/c");
        add_doc(&mut aggregator, vec![TARGET, 2], "rooms/d");

        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Reset, vec![TARGET], b""))
            .unwrap();
        // The backend resends one of the committed documents after the reset.
        add_doc(&mut aggregator, vec![TARGET], "rooms/b");

        let event = aggregator.create_remote_event(version(2));
        let change = &event.target_changes[&TARGET];
        assert!(!change.current);
        assert!(change.resume_token.is_empty());
        assert_eq!(change.removed_documents.iter().cloned().collect::<Vec<_>>(), vec![key("rooms/a")]);
        assert!(change.modified_documents.contains(&key("rooms/b")));
        assert!(change.added_documents.is_empty());

        // rooms/c was only known through the reset target, rooms/d is still
        // needed by target 2.
        assert!(!event.document_updates.contains_key(&key("rooms/c")));
        assert!(event.document_updates.contains_key(&key("rooms/d")));
        assert!(event.target_changes[&2].added_documents.contains(&key("rooms/d")));
    }

    #[test]
    fn existence_filter_mismatch_resets_target() {
        let metadata = Arc::new(
            TestTargetMetadata::new()
                .with_query(TARGET, "rooms")
                .with_remote_keys(TARGET, &["rooms/a", "rooms/b"]),
        );
        let mut aggregator = aggregator(&metadata);
        aggregator.create_remote_event(version(1));

        aggregator
            .handle_existence_filter(ExistenceFilterWatchChange::new(TARGET, 1))
            .unwrap();

        let event = aggregator.create_remote_event(version(2));
        assert_eq!(
            event.target_resets.get(&TARGET),
            Some(&QueryPurpose::ExistenceFilterMismatch)
        );
        let change = &event.target_changes[&TARGET];
        assert_eq!(change.removed_documents.len(), 2);
    }

    #[test]
    fn existence_filter_counts_pending_changes() {
        let metadata = Arc::new(
            TestTargetMetadata::new()
                .with_query(TARGET, "rooms")
                .with_remote_keys(TARGET, &["rooms/a"]),
        );
        let mut aggregator = aggregator(&metadata);
        add_doc(&mut aggregator, vec![TARGET], "rooms/b");

        aggregator
            .handle_existence_filter(ExistenceFilterWatchChange::new(TARGET, 2))
            .unwrap();

        let event = aggregator.create_remote_event(version(1));
        assert!(event.target_resets.is_empty());
        assert!(event.target_changes[&TARGET].added_documents.contains(&key("rooms/b")));
    }

    #[test]
    fn existence_filter_for_missing_document_deletes_it() {
        let metadata = Arc::new(
            TestTargetMetadata::new()
                .with_document_lookup(TARGET, "rooms/a")
                .with_remote_keys(TARGET, &["rooms/a"]),
        );
        let mut aggregator = aggregator(&metadata);

        aggregator
            .handle_existence_filter(ExistenceFilterWatchChange::new(TARGET, 0))
            .unwrap();

        let event = aggregator.create_remote_event(version(1));
        assert!(event.target_resets.is_empty());
        assert!(event.target_changes[&TARGET].removed_documents.contains(&key("rooms/a")));
        assert!(!event.document_updates[&key("rooms/a")].exists());
    }

    #[test]
    fn existence_filter_for_document_lookup_rejects_large_counts() {
        let metadata = Arc::new(TestTargetMetadata::new().with_document_lookup(TARGET, "rooms/a"));
        let mut aggregator = aggregator(&metadata);

        aggregator
            .handle_existence_filter(ExistenceFilterWatchChange::new(TARGET, 1))
            .unwrap();
        let err = aggregator
            .handle_existence_filter(ExistenceFilterWatchChange::new(TARGET, 2))
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/internal");
    }

    #[test]
    fn current_document_lookup_without_document_reports_removal() {
        let metadata = Arc::new(TestTargetMetadata::new().with_document_lookup(TARGET, "rooms/a"));
        let mut aggregator = aggregator(&metadata);

        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Current, vec![TARGET], b"t"))
            .unwrap();
        let event = aggregator.create_remote_event(version(5));

        let update = &event.document_updates[&key("rooms/a")];
        assert!(!update.exists());
        assert_eq!(update.version(), version(5));
        let change = &event.target_changes[&TARGET];
        assert!(change.current);
        assert_eq!(change.removed_documents.iter().cloned().collect::<Vec<_>>(), vec![key("rooms/a")]);
    }

    #[test]
    fn synthesized_delete_is_issued_once() {
        let metadata = Arc::new(TestTargetMetadata::new().with_limbo(TARGET, "rooms/a"));
        let mut aggregator = aggregator(&metadata);
        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Current, vec![TARGET], b"t"))
            .unwrap();

        let first = aggregator.create_remote_event(version(5));
        assert!(first.resolved_limbo_documents.contains(&key("rooms/a")));

        let second = aggregator.create_remote_event(version(6));
        assert!(second.is_empty());

        // A reset starts a new incarnation that may need its own tombstone.
        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Reset, vec![TARGET], b""))
            .unwrap();
        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Current, vec![TARGET], b"u"))
            .unwrap();
        let third = aggregator.create_remote_event(version(7));
        assert_eq!(third.document_updates[&key("rooms/a")].version(), version(7));
    }

    #[test]
    fn current_document_lookup_with_committed_document_keeps_it() {
        let metadata = Arc::new(
            TestTargetMetadata::new()
                .with_document_lookup(TARGET, "rooms/a")
                .with_remote_keys(TARGET, &["rooms/a"]),
        );
        let mut aggregator = aggregator(&metadata);

        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Current, vec![TARGET], b"t"))
            .unwrap();
        let event = aggregator.create_remote_event(version(5));
        assert!(event.document_updates.is_empty());
    }

    #[test]
    fn synthesized_delete_for_limbo_lookup_resolves_limbo_document() {
        let metadata = Arc::new(TestTargetMetadata::new().with_limbo(TARGET, "rooms/a"));
        let mut aggregator = aggregator(&metadata);

        aggregator
            .handle_watch_change(target_change(WatchTargetChangeState::Current, vec![TARGET], b"t"))
            .unwrap();
        let event = aggregator.create_remote_event(version(5));
        assert!(event.resolved_limbo_documents.contains(&key("rooms/a")));
    }

    #[test]
    fn limbo_documents_are_isolated_from_listen_targets() {
        let metadata = Arc::new(
            TestTargetMetadata::new()
                .with_query(TARGET, "rooms")
                .with_limbo(2, "rooms/a")
                .with_limbo(3, "rooms/b"),
        );
        let mut aggregator = aggregator(&metadata);

        add_doc(&mut aggregator, vec![2], "rooms/a");
        add_doc(&mut aggregator, vec![TARGET, 3], "rooms/b");

        let event = aggregator.create_remote_event(version(1));
        assert_eq!(
            event.resolved_limbo_documents.iter().cloned().collect::<Vec<_>>(),
            vec![key("rooms/a")]
        );
        assert!(!event.target_changes[&TARGET].added_documents.contains(&key("rooms/a")));
        assert!(event.target_changes[&TARGET].added_documents.contains(&key("rooms/b")));
    }
}
