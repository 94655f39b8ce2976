//! Fixtures shared by the watch unit tests.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use crate::firestore::local::{QueryPurpose, TargetData};
use crate::firestore::model::{
    DeletedDocument, Document, DocumentKey, ResourcePath, SnapshotVersion, Target, Timestamp,
};
use crate::firestore::remote::TargetMetadataProvider;

pub fn key(path: &str) -> DocumentKey {
    DocumentKey::from_string(path).unwrap()
}

pub fn version(seconds: i64) -> SnapshotVersion {
    SnapshotVersion::new(Timestamp::new(seconds, 0))
}

pub fn doc(path: &str, seconds: i64) -> Document {
    let mut fields = BTreeMap::new();
    fields.insert("path".to_string(), json!(path));
    Document::new(key(path), version(seconds), fields)
}

pub fn deleted_doc(path: &str, seconds: i64) -> DeletedDocument {
    DeletedDocument::new(key(path), version(seconds))
}

/// Static metadata provider: target data and committed keys are fixed when
/// the fixture is built.
#[derive(Default)]
pub struct TestTargetMetadata {
    targets: BTreeMap<i32, TargetData>,
    remote_keys: BTreeMap<i32, BTreeSet<DocumentKey>>,
}

impl TestTargetMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(self, target_id: i32, collection: &str) -> Self {
        let path = ResourcePath::from_string(collection).unwrap();
        self.with_target(target_id, Target::collection(path), QueryPurpose::Listen)
    }

    pub fn with_document_lookup(self, target_id: i32, path: &str) -> Self {
        self.with_target(target_id, Target::document(&key(path)), QueryPurpose::Listen)
    }

    pub fn with_limbo(self, target_id: i32, path: &str) -> Self {
        self.with_target(
            target_id,
            Target::document(&key(path)),
            QueryPurpose::LimboResolution,
        )
    }

    pub fn with_remote_keys(mut self, target_id: i32, paths: &[&str]) -> Self {
        self.remote_keys
            .entry(target_id)
            .or_default()
            .extend(paths.iter().map(|path| key(path)));
        self
    }

    fn with_target(mut self, target_id: i32, target: Target, purpose: QueryPurpose) -> Self {
        self.targets
            .insert(target_id, TargetData::new(target, target_id, purpose, 0));
        self
    }
}

impl TargetMetadataProvider for TestTargetMetadata {
    fn get_remote_keys(&self, target_id: i32) -> BTreeSet<DocumentKey> {
        self.remote_keys.get(&target_id).cloned().unwrap_or_default()
    }

    fn get_target_data(&self, target_id: i32) -> Option<TargetData> {
        self.targets.get(&target_id).cloned()
    }
}
