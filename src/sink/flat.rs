//! Flat directory layout: one image file per asset, named by its filename.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{ignore_not_found, AssetSink};

#[derive(Debug)]
pub struct FlatSink {
    root: PathBuf,
}

impl FlatSink {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl AssetSink for FlatSink {
    async fn write(&self, filename: &str, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(filename), bytes).await
    }

    async fn remove(&self, filename: &str) -> std::io::Result<()> {
        ignore_not_found(tokio::fs::remove_file(self.path_for(filename)).await)
    }

    fn exists(&self, filename: &str) -> bool {
        self.path_for(filename).exists()
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }
}
