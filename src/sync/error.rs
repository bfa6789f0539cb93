use thiserror::Error;

/// Typed per-asset sync errors.
///
/// The transport/validation split matters for diagnostics: a `Transport`
/// error means the asset never arrived, while a validation error
/// (`HttpStatus`, `ContentType`) means the server answered with something
/// that is not the image — typically an HTML error page served as 200.
/// Both mark the asset `failed` for this run; neither aborts the pool.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("could not probe remote status for {url}: {source}")]
    Probe { url: String, source: reqwest::Error },

    #[error("download failed for {url}: {source}")]
    Transport { url: String, source: reqwest::Error },

    #[error("server returned status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("invalid content type '{content_type}' for image at {url}; server may have returned an error page")]
    ContentType { content_type: String, url: String },

    #[error("sink write failed: {0}")]
    Sink(#[from] std::io::Error),
}

impl AssetError {
    /// True when the transfer itself succeeded but the response failed
    /// validation (wrong status or non-image payload).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AssetError::HttpStatus { .. } | AssetError::ContentType { .. }
        )
    }
}
