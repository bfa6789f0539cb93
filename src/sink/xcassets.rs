//! Xcode asset catalog layout: each image lives in `<stem>.imageset/`
//! alongside a generated `Contents.json` descriptor.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use super::{ignore_not_found, AssetSink};

#[derive(Debug)]
pub struct XcassetsSink {
    root: PathBuf,
}

/// `Contents.json` document for a single-image imageset.
#[derive(Debug, Serialize)]
struct ContentsDescriptor {
    images: Vec<ImageRef>,
    info: DescriptorInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<DescriptorProperties>,
}

#[derive(Debug, Serialize)]
struct ImageRef {
    filename: String,
    idiom: &'static str,
}

#[derive(Debug, Serialize)]
struct DescriptorInfo {
    author: &'static str,
    version: u32,
}

#[derive(Debug, Serialize)]
struct DescriptorProperties {
    #[serde(rename = "preserves-vector-representation")]
    preserves_vector_representation: bool,
}

impl ContentsDescriptor {
    fn for_image(filename: &str) -> Self {
        // Xcode rasterizes SVGs at build time unless the imageset opts into
        // keeping the vector representation.
        let properties = filename
            .to_ascii_lowercase()
            .ends_with(".svg")
            .then_some(DescriptorProperties {
                preserves_vector_representation: true,
            });
        Self {
            images: vec![ImageRef {
                filename: filename.to_string(),
                idiom: "universal",
            }],
            info: DescriptorInfo {
                author: "xcode",
                version: 1,
            },
            properties,
        }
    }
}

impl XcassetsSink {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Directory of the asset's imageset bundle: `<root>/<stem>.imageset`.
    fn imageset_dir(&self, filename: &str) -> PathBuf {
        let stem = match filename.rsplit_once('.') {
            Some((stem, _ext)) => stem,
            None => filename,
        };
        self.root.join(format!("{}.imageset", stem))
    }
}

#[async_trait]
impl AssetSink for XcassetsSink {
    async fn write(&self, filename: &str, bytes: &[u8]) -> std::io::Result<()> {
        let dir = self.imageset_dir(filename);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(filename), bytes).await?;

        let descriptor = ContentsDescriptor::for_image(filename);
        let json = serde_json::to_vec_pretty(&descriptor)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(dir.join("Contents.json"), json).await
    }

    async fn remove(&self, filename: &str) -> std::io::Result<()> {
        ignore_not_found(tokio::fs::remove_dir_all(self.imageset_dir(filename)).await)
    }

    fn exists(&self, filename: &str) -> bool {
        self.path_for(filename).exists()
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.imageset_dir(filename).join(filename)
    }
}
