use std::collections::BTreeMap;
use std::sync::Arc;

use crate::firestore::error::{internal_error, FirestoreResult};
use crate::firestore::local::TargetData;
use crate::firestore::model::{ByteString, SnapshotVersion};
use crate::firestore::remote::remote_syncer::RemoteSyncer;
use crate::firestore::remote::watch_change::{WatchChange, WatchTargetChange};
use crate::firestore::remote::{TargetMetadataProvider, WatchChangeAggregator};

/// Outbound half of the watch stream: add/remove target requests.
pub trait WatchStream: Send + Sync {
    fn watch(&self, target_data: &TargetData) -> FirestoreResult<()>;
    fn unwatch(&self, target_id: i32) -> FirestoreResult<()>;
}

/// Owns the set of listened targets for one client and drives a
/// [`WatchChangeAggregator`] for every open watch stream.
///
/// The session raises a remote event whenever the stream reports a global
/// snapshot version, re-listens targets whose existence filter did not match
/// and routes rejected targets to the [`RemoteSyncer`].
pub struct ListenSession {
    metadata: Arc<dyn TargetMetadataProvider>,
    syncer: Arc<dyn RemoteSyncer>,
    stream: Arc<dyn WatchStream>,
    listen_targets: BTreeMap<i32, TargetData>,
    watch_aggregator: Option<WatchChangeAggregator<dyn TargetMetadataProvider>>,
    last_remote_snapshot_version: SnapshotVersion,
}

impl ListenSession {
    pub fn new(
        metadata: Arc<dyn TargetMetadataProvider>,
        syncer: Arc<dyn RemoteSyncer>,
        stream: Arc<dyn WatchStream>,
    ) -> Self {
        Self {
            metadata,
            syncer,
            stream,
            listen_targets: BTreeMap::new(),
            watch_aggregator: None,
            last_remote_snapshot_version: SnapshotVersion::none(),
        }
    }

    pub fn is_stream_open(&self) -> bool {
        self.watch_aggregator.is_some()
    }

    pub fn listen_target(&self, target_id: i32) -> Option<&TargetData> {
        self.listen_targets.get(&target_id)
    }

    pub fn last_remote_snapshot_version(&self) -> SnapshotVersion {
        self.last_remote_snapshot_version
    }

    /// Starts listening to `target_data`. The watch request goes out right
    /// away when the stream is open, otherwise on the next open. Listening to
    /// a target id twice is a no-op.
    pub fn listen(&mut self, target_data: TargetData) -> FirestoreResult<()> {
        let target_id = target_data.target_id;
        if self.listen_targets.contains_key(&target_id) {
            log::debug!("target {target_id} is already listened to");
            return Ok(());
        }

        self.listen_targets.insert(target_id, target_data.clone());
        if self.is_stream_open() {
            self.send_watch_request(&target_data)?;
        }
        Ok(())
    }

    pub fn stop_listening(&mut self, target_id: i32) -> FirestoreResult<()> {
        if self.listen_targets.remove(&target_id).is_none() {
            return Err(internal_error(format!("target {target_id} is not listened to")));
        }

        if self.is_stream_open() {
            self.send_unwatch_request(target_id)?;
        }
        Ok(())
    }

    /// Begins a new stream session and re-sends every listened target.
    pub fn on_stream_open(&mut self) -> FirestoreResult<()> {
        self.watch_aggregator = Some(WatchChangeAggregator::new(Arc::clone(&self.metadata)));

        let targets: Vec<TargetData> = self.listen_targets.values().cloned().collect();
        log::debug!("watch stream open, re-sending {} target(s)", targets.len());
        for target_data in targets {
            self.send_watch_request(&target_data)?;
        }
        Ok(())
    }

    /// Drops everything aggregated since the last remote event.
    pub fn on_stream_close(&mut self) {
        if self.watch_aggregator.take().is_some() {
            log::debug!("watch stream closed, discarding aggregated changes");
        }
    }

    /// Feeds one watch change into the aggregator. A non-none
    /// `snapshot_version` marks a global consistency point at which a remote
    /// event is raised.
    pub fn handle_watch_change(
        &mut self,
        change: WatchChange,
        snapshot_version: SnapshotVersion,
    ) -> FirestoreResult<()> {
        if !self.is_stream_open() {
            log::debug!("ignoring watch change received while the stream is closed");
            return Ok(());
        }

        if let WatchChange::Target(target_change) = &change {
            if target_change.cause.is_some() {
                return self.process_target_error(target_change);
            }
        }

        self.aggregator_mut()?.handle_watch_change(change)?;

        if !snapshot_version.is_none() && snapshot_version >= self.last_remote_snapshot_version {
            self.raise_watch_snapshot(snapshot_version)?;
        }
        Ok(())
    }

    fn raise_watch_snapshot(&mut self, snapshot_version: SnapshotVersion) -> FirestoreResult<()> {
        let event = self.aggregator_mut()?.create_remote_event(snapshot_version);

        for (target_id, change) in &event.target_changes {
            if change.resume_token.is_empty() {
                continue;
            }
            if let Some(target_data) = self.listen_targets.get_mut(target_id) {
                *target_data =
                    target_data.with_resume_token(change.resume_token.clone(), snapshot_version);
            }
        }

        for (target_id, purpose) in &event.target_resets {
            // The target may have been unlistened in the meantime.
            let Some(target_data) = self.listen_targets.get(target_id).cloned() else {
                continue;
            };

            // Without a resume token the backend resends the full result set.
            let cleared =
                target_data.with_resume_token(ByteString::empty(), target_data.snapshot_version);
            self.listen_targets.insert(*target_id, cleared.clone());

            log::debug!("re-listening target {target_id} as {purpose:?}");
            self.send_unwatch_request(*target_id)?;
            self.send_watch_request(&cleared.with_purpose(*purpose))?;
        }

        self.last_remote_snapshot_version = snapshot_version;
        self.syncer.apply_remote_event(event)
    }

    fn process_target_error(&mut self, change: &WatchTargetChange) -> FirestoreResult<()> {
        let Some(cause) = change.cause.clone() else {
            return Ok(());
        };

        for target_id in &change.target_ids {
            if self.listen_targets.remove(target_id).is_none() {
                continue;
            }
            log::debug!("watch target {target_id} rejected: {cause}");
            self.aggregator_mut()?.remove_target(*target_id);
            self.syncer.reject_listen(*target_id, cause.clone())?;
        }
        Ok(())
    }

    fn send_watch_request(&mut self, target_data: &TargetData) -> FirestoreResult<()> {
        self.aggregator_mut()?
            .record_pending_target_request(target_data.target_id);
        self.stream.watch(target_data)
    }

    fn send_unwatch_request(&mut self, target_id: i32) -> FirestoreResult<()> {
        self.aggregator_mut()?
            .record_pending_target_request(target_id);
        self.stream.unwatch(target_id)
    }

    fn aggregator_mut(
        &mut self,
    ) -> FirestoreResult<&mut WatchChangeAggregator<dyn TargetMetadataProvider>> {
        self.watch_aggregator
            .as_mut()
            .ok_or_else(|| internal_error("watch stream is not open"))
    }
}
