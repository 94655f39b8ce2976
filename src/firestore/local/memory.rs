use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex as StdMutex;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::local::{QueryPurpose, TargetData};
use crate::firestore::model::{
    ByteString, DocumentKey, ResourcePath, SnapshotVersion, Target, Timestamp,
};
use crate::firestore::remote::remote_event::RemoteEvent;
use crate::firestore::remote::TargetMetadataProvider;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetMetadataSnapshot {
    pub target_id: i32,
    pub resume_token: ByteString,
    pub snapshot_version: SnapshotVersion,
    pub current: bool,
    pub remote_keys: BTreeSet<DocumentKey>,
}

#[derive(Clone, Debug)]
struct CachedTarget {
    data: TargetData,
    current: bool,
    remote_keys: BTreeSet<DocumentKey>,
}

/// In-memory target cache that serves as the watch aggregator's metadata
/// provider.
///
/// Committed keys only change when a remote event is applied, so lookups made
/// while a new event is being aggregated see the state of the previous one.
#[derive(Default)]
pub struct MemoryTargetCache {
    targets: StdMutex<BTreeMap<i32, CachedTarget>>,
}

impl MemoryTargetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `target_data`. Re-adding a target keeps its committed
    /// keys.
    pub fn add_target(&self, target_data: TargetData) {
        let mut targets = self.targets.lock().unwrap();
        match targets.get_mut(&target_data.target_id) {
            Some(cached) => cached.data = target_data,
            None => {
                targets.insert(
                    target_data.target_id,
                    CachedTarget {
                        data: target_data,
                        current: false,
                        remote_keys: BTreeSet::new(),
                    },
                );
            }
        }
    }

    pub fn remove_target(&self, target_id: i32) -> Option<TargetData> {
        self.targets
            .lock()
            .unwrap()
            .remove(&target_id)
            .map(|cached| cached.data)
    }

    pub fn target_ids(&self) -> Vec<i32> {
        self.targets.lock().unwrap().keys().copied().collect()
    }

    /// Commits the key changes and resume tokens of `event`. Changes for
    /// targets that are no longer cached are skipped.
    pub fn apply_remote_event(&self, event: &RemoteEvent) {
        let mut targets = self.targets.lock().unwrap();
        for (target_id, change) in &event.target_changes {
            let Some(cached) = targets.get_mut(target_id) else {
                log::debug!("skipping remote event changes for unknown target {target_id}");
                continue;
            };

            for key in &change.removed_documents {
                cached.remote_keys.remove(key);
            }
            cached
                .remote_keys
                .extend(change.added_documents.iter().cloned());
            cached
                .remote_keys
                .extend(change.modified_documents.iter().cloned());
            cached.current = change.current;

            if !change.resume_token.is_empty() {
                cached.data = cached
                    .data
                    .with_resume_token(change.resume_token.clone(), event.snapshot_version);
            }
        }
    }

    pub fn target_metadata_snapshot(&self, target_id: i32) -> Option<TargetMetadataSnapshot> {
        self.targets
            .lock()
            .unwrap()
            .get(&target_id)
            .map(|cached| TargetMetadataSnapshot {
                target_id,
                resume_token: cached.data.resume_token.clone(),
                snapshot_version: cached.data.snapshot_version,
                current: cached.current,
                remote_keys: cached.remote_keys.clone(),
            })
    }

    /// Serializes every cached target, including its committed keys.
    pub fn export_json(&self) -> String {
        let targets = self.targets.lock().unwrap();
        let entries = targets.values().map(encode_target).collect::<Vec<_>>();
        json!({ "targets": entries }).to_string()
    }

    /// Replaces the cache contents with targets previously produced by
    /// [`MemoryTargetCache::export_json`].
    pub fn restore_json(&self, payload: &str) -> FirestoreResult<()> {
        let persisted: PersistedCache = serde_json::from_str(payload)
            .map_err(|err| invalid_argument(format!("Failed to decode target cache: {err}")))?;

        let mut restored = BTreeMap::new();
        for target in persisted.targets {
            let cached = decode_target(target)?;
            restored.insert(cached.data.target_id, cached);
        }

        *self.targets.lock().unwrap() = restored;
        Ok(())
    }
}

impl TargetMetadataProvider for MemoryTargetCache {
    fn get_remote_keys(&self, target_id: i32) -> BTreeSet<DocumentKey> {
        self.targets
            .lock()
            .unwrap()
            .get(&target_id)
            .map(|cached| cached.remote_keys.clone())
            .unwrap_or_default()
    }

    fn get_target_data(&self, target_id: i32) -> Option<TargetData> {
        self.targets
            .lock()
            .unwrap()
            .get(&target_id)
            .map(|cached| cached.data.clone())
    }
}

#[derive(Deserialize)]
struct PersistedCache {
    #[serde(default)]
    targets: Vec<PersistedTarget>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedTarget {
    target_id: i32,
    path: String,
    #[serde(default)]
    collection_group: Option<String>,
    #[serde(default)]
    filters: Vec<String>,
    purpose: String,
    #[serde(default)]
    sequence_number: i64,
    #[serde(default)]
    snapshot_version: Option<PersistedVersion>,
    #[serde(default)]
    resume_token: Option<String>,
    #[serde(default)]
    current: bool,
    #[serde(default)]
    remote_keys: Vec<String>,
}

#[derive(Deserialize)]
struct PersistedVersion {
    seconds: i64,
    nanos: i32,
}

fn encode_target(cached: &CachedTarget) -> JsonValue {
    let data = &cached.data;
    let version = data.snapshot_version.timestamp();
    let mut object = serde_json::Map::new();
    object.insert("targetId".into(), json!(data.target_id));
    object.insert("path".into(), json!(data.target.path().canonical_string()));
    if let Some(group) = data.target.collection_group_id() {
        object.insert("collectionGroup".into(), json!(group));
    }
    object.insert("filters".into(), json!(data.target.filters()));
    object.insert("purpose".into(), json!(purpose_to_str(data.purpose)));
    object.insert("sequenceNumber".into(), json!(data.sequence_number));
    object.insert(
        "snapshotVersion".into(),
        json!({
            "seconds": version.seconds,
            "nanos": version.nanos,
        }),
    );
    if !data.resume_token.is_empty() {
        object.insert("resumeToken".into(), json!(data.resume_token.to_base64()));
    }
    object.insert("current".into(), json!(cached.current));
    object.insert(
        "remoteKeys".into(),
        json!(cached
            .remote_keys
            .iter()
            .map(|key| key.path().canonical_string())
            .collect::<Vec<_>>()),
    );
    JsonValue::Object(object)
}

fn decode_target(target: PersistedTarget) -> FirestoreResult<CachedTarget> {
    let path = ResourcePath::from_string(&target.path)?;
    let mut decoded = match target.collection_group {
        Some(group) => Target::collection_group(path, group),
        None => Target::collection(path),
    };
    for filter in target.filters {
        decoded = decoded.with_filter(filter);
    }

    let resume_token = target
        .resume_token
        .map(|token| {
            ByteString::from_base64(&token)
                .map_err(|err| invalid_argument(format!("Invalid resume token: {err}")))
        })
        .transpose()?
        .unwrap_or_default();
    let snapshot_version = target
        .snapshot_version
        .map(|version| SnapshotVersion::new(Timestamp::new(version.seconds, version.nanos)))
        .unwrap_or_default();

    let remote_keys = target
        .remote_keys
        .iter()
        .map(|key| DocumentKey::from_string(key))
        .collect::<FirestoreResult<BTreeSet<_>>>()?;

    let data = TargetData::new(
        decoded,
        target.target_id,
        purpose_from_str(&target.purpose)?,
        target.sequence_number,
    )
    .with_resume_token(resume_token, snapshot_version);

    Ok(CachedTarget {
        data,
        current: target.current,
        remote_keys,
    })
}

fn purpose_to_str(purpose: QueryPurpose) -> &'static str {
    match purpose {
        QueryPurpose::Listen => "LISTEN",
        QueryPurpose::ExistenceFilterMismatch => "EXISTENCE_FILTER_MISMATCH",
        QueryPurpose::LimboResolution => "LIMBO_RESOLUTION",
    }
}

fn purpose_from_str(value: &str) -> FirestoreResult<QueryPurpose> {
    match value {
        "LISTEN" => Ok(QueryPurpose::Listen),
        "EXISTENCE_FILTER_MISMATCH" => Ok(QueryPurpose::ExistenceFilterMismatch),
        "LIMBO_RESOLUTION" => Ok(QueryPurpose::LimboResolution),
        other => Err(invalid_argument(format!("Unknown query purpose {other}"))),
    }
}
