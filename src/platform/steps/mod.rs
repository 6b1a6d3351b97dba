//! Step units shared by several platforms.

mod archive;
mod upload;

pub use archive::{ArchiveFormat, Compressor, ScratchArtifact};
pub use upload::{
    ArtifactUploader, LocalFile, OverwritePolicy, SyncPlan, SyncUploader, collect_local_files,
    plan_sync,
};
