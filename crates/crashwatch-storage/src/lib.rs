//! Storage capabilities for the accident detection pipeline.
//!
//! - [`EvidenceStore`]: persists annotated evidence frames and the accident clip
//! - [`ResultCache`]: key-value cache of analysis results by result id

pub mod error;
pub mod evidence;
pub mod result_cache;

pub use error::{StorageError, StorageResult};
pub use evidence::{EvidenceFrame, EvidenceStore, LocalEvidenceStore, MemoryEvidenceStore, StoredArtifact};
pub use result_cache::{
    compress_result, decompress_result, FsResultCache, MemoryResultCache, ResultCache,
};
