mod byte_string;
mod document;
mod document_key;
mod resource_path;
mod target;
mod timestamp;

pub use byte_string::ByteString;
pub use document::{DeletedDocument, Document, MaybeDocument};
pub use document_key::DocumentKey;
pub use resource_path::ResourcePath;
pub use target::Target;
pub use timestamp::{SnapshotVersion, Timestamp};
