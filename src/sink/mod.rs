//! Asset sink — abstracts the physical on-disk layout of one asset.
//!
//! Two layouts exist: a flat directory of image files, and an Xcode asset
//! catalog where each image lives in its own `.imageset` directory next to
//! a generated `Contents.json` descriptor. The sync engine only ever talks
//! to the [`AssetSink`] trait; the layout is picked once at startup.

pub mod flat;
pub mod xcassets;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

pub use flat::FlatSink;
pub use xcassets::XcassetsSink;

/// Output layout selected by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkLayout {
    /// One file per asset directly under the target root.
    Flat,
    /// One `.imageset` bundle per asset (Xcode asset catalog).
    Xcassets,
}

/// Physical storage for synced assets.
///
/// Implementations own disjoint paths per filename, so concurrent workers
/// never contend on the same sink entry.
#[async_trait]
pub trait AssetSink: Send + Sync {
    /// Write the asset's bytes (and any layout-specific sidecar files).
    /// Creates parent directories as needed.
    async fn write(&self, filename: &str, bytes: &[u8]) -> std::io::Result<()>;

    /// Remove the asset's entry entirely. Idempotent: removing an entry that
    /// does not exist succeeds.
    async fn remove(&self, filename: &str) -> std::io::Result<()>;

    /// Whether the asset's image file is physically present.
    fn exists(&self, filename: &str) -> bool;

    /// Path of the asset's image file under this layout.
    fn path_for(&self, filename: &str) -> PathBuf;
}

/// Construct the sink for the chosen layout rooted at `root`. The sink is
/// shared across all sync workers.
pub fn open_sink(layout: SinkLayout, root: &Path) -> Arc<dyn AssetSink> {
    match layout {
        SinkLayout::Flat => Arc::new(FlatSink::new(root.to_path_buf())),
        SinkLayout::Xcassets => Arc::new(XcassetsSink::new(root.to_path_buf())),
    }
}

/// Map "already absent" to success so removal is idempotent.
pub(crate) fn ignore_not_found(result: std::io::Result<()>) -> std::io::Result<()> {
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
pub(crate) fn test_tmp_dir(subdir: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("devimg-sync-tests").join(subdir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
