//! Persisted sync state — one JSON document per target root.
//!
//! The manifest records the cache validator last seen for every synced
//! filename, plus a SHA-256 digest of the last successfully processed
//! catalog payload. It is loaded once at startup and written exactly once
//! after all sync work completes, so an interrupted run never corrupts the
//! previous manifest.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Filename of the manifest inside the target root.
pub const MANIFEST_FILENAME: &str = "image_manifest.json";

/// Cache-validation record for a single asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Opaque remote validator: an ETag, a Last-Modified date, or a
    /// synthesized force-update token when the server supplied neither.
    pub etag: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,

    /// SHA-256 hex digest of the raw catalog payload from the last
    /// completed sync. Matching digests short-circuit the whole run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_hash: Option<String>,
}

impl Manifest {
    /// Load the manifest from `path`, falling back to an empty manifest if
    /// the file is absent, unreadable, or not valid JSON. A corrupt manifest
    /// only costs a full resync, so this never fails.
    pub async fn load(path: &Path) -> Self {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(
                    "Could not read manifest at {}: {}. Starting fresh.",
                    path.display(),
                    e
                );
                return Self::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(
                    "Could not parse manifest at {}: {}. Starting fresh.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Serialize the full manifest to `path`, replacing any existing file.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}
