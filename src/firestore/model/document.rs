use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::firestore::model::{DocumentKey, SnapshotVersion};

/// A document known to exist at `version`.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub key: DocumentKey,
    pub version: SnapshotVersion,
    pub fields: BTreeMap<String, JsonValue>,
}

impl Document {
    pub fn new(
        key: DocumentKey,
        version: SnapshotVersion,
        fields: BTreeMap<String, JsonValue>,
    ) -> Self {
        Self {
            key,
            version,
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        self.fields.get(name)
    }
}

/// Tombstone for a document known not to exist at `version`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletedDocument {
    pub key: DocumentKey,
    pub version: SnapshotVersion,
}

impl DeletedDocument {
    pub fn new(key: DocumentKey, version: SnapshotVersion) -> Self {
        Self { key, version }
    }
}

/// Either a live document or a tombstone, as delivered by the watch stream.
#[derive(Clone, Debug, PartialEq)]
pub enum MaybeDocument {
    Document(Document),
    Deleted(DeletedDocument),
}

impl MaybeDocument {
    pub fn version(&self) -> SnapshotVersion {
        match self {
            MaybeDocument::Document(document) => document.version,
            MaybeDocument::Deleted(deleted) => deleted.version,
        }
    }

    pub fn exists(&self) -> bool {
        matches!(self, MaybeDocument::Document(_))
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            MaybeDocument::Document(document) => Some(document),
            MaybeDocument::Deleted(_) => None,
        }
    }
}

impl From<Document> for MaybeDocument {
    fn from(value: Document) -> Self {
        MaybeDocument::Document(value)
    }
}

impl From<DeletedDocument> for MaybeDocument {
    fn from(value: DeletedDocument) -> Self {
        MaybeDocument::Deleted(value)
    }
}
