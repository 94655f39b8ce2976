use std::fmt::{Display, Formatter};

use crate::firestore::model::{DocumentKey, ResourcePath};

/// What a watch target selects on the backend: either a single document by
/// path, or the documents of a collection (group) narrowed by filters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    path: ResourcePath,
    collection_group: Option<String>,
    filters: Vec<String>,
}

impl Target {
    /// Point lookup of one document.
    pub fn document(key: &DocumentKey) -> Self {
        Self {
            path: key.path().clone(),
            collection_group: None,
            filters: Vec::new(),
        }
    }

    /// All documents directly under `collection_path`.
    pub fn collection(collection_path: ResourcePath) -> Self {
        Self {
            path: collection_path,
            collection_group: None,
            filters: Vec::new(),
        }
    }

    /// All documents in collections named `collection_id` below `parent`.
    pub fn collection_group(parent: ResourcePath, collection_id: impl Into<String>) -> Self {
        Self {
            path: parent,
            collection_group: Some(collection_id.into()),
            filters: Vec::new(),
        }
    }

    /// Adds a filter in its canonical textual form (e.g. `population>100000`).
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn collection_group_id(&self) -> Option<&str> {
        self.collection_group.as_deref()
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn is_document_query(&self) -> bool {
        DocumentKey::is_document_key(&self.path)
            && self.collection_group.is_none()
            && self.filters.is_empty()
    }

    /// The looked-up key for a document query, `None` for collection queries.
    pub fn document_key(&self) -> Option<DocumentKey> {
        if !self.is_document_query() {
            return None;
        }
        DocumentKey::from_path(self.path.clone()).ok()
    }

    pub fn canonical_id(&self) -> String {
        let mut id = self.path.canonical_string();
        if let Some(group) = &self.collection_group {
            id.push_str("|cg:");
            id.push_str(group);
        }
        if !self.filters.is_empty() {
            id.push_str("|f:");
            id.push_str(&self.filters.join(","));
        }
        id
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Target({})", self.canonical_id())
    }
}
