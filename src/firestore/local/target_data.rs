use crate::firestore::model::{ByteString, SnapshotVersion, Target};

/// Why a target is being listened to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryPurpose {
    /// A regular listen on behalf of a user query.
    Listen,
    /// Re-listen issued after the server's existence filter disagreed with
    /// the local result set.
    ExistenceFilterMismatch,
    /// A one-document listen confirming whether a limbo document exists.
    LimboResolution,
}

/// Everything the client tracks about one watch target.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetData {
    pub target: Target,
    pub target_id: i32,
    pub purpose: QueryPurpose,
    pub sequence_number: i64,
    pub snapshot_version: SnapshotVersion,
    pub resume_token: ByteString,
}

impl TargetData {
    pub fn new(target: Target, target_id: i32, purpose: QueryPurpose, sequence_number: i64) -> Self {
        Self {
            target,
            target_id,
            purpose,
            sequence_number,
            snapshot_version: SnapshotVersion::none(),
            resume_token: ByteString::empty(),
        }
    }

    pub fn with_resume_token(&self, resume_token: ByteString, snapshot_version: SnapshotVersion) -> Self {
        Self {
            resume_token,
            snapshot_version,
            ..self.clone()
        }
    }

    pub fn with_purpose(&self, purpose: QueryPurpose) -> Self {
        Self {
            purpose,
            ..self.clone()
        }
    }
}
