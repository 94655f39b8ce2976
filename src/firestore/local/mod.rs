pub mod memory;
pub mod target_data;

#[doc(inline)]
pub use memory::{MemoryTargetCache, TargetMetadataSnapshot};
#[doc(inline)]
pub use target_data::{QueryPurpose, TargetData};
