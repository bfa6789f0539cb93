//! Device catalog fetcher and asset resolver.
//!
//! The catalog is a JSON array of device hardware records served by the
//! device API. It is fetched fresh on every run; the only thing persisted
//! about it is a SHA-256 digest of the raw payload (for the short-circuit
//! check) and the set of image filenames it references.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// One device hardware record. Only the fields the sync cares about are
/// modeled; the API carries many more, all ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub hw_model: Option<u32>,
    pub hw_model_slug: Option<String>,
    pub display_name: Option<String>,
    /// Image filenames referenced by this device. Absent means none.
    #[serde(default)]
    pub images: Vec<String>,
}

/// Errors are split by fatality: a network failure is an expected operating
/// condition (offline build machine) and exits cleanly, while a payload that
/// fetched fine but does not parse means the server is misbehaving and the
/// run must fail loudly.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not fetch catalog from {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("catalog response is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A successfully fetched and parsed catalog.
#[derive(Debug)]
pub struct FetchedCatalog {
    pub devices: Vec<Device>,
    /// SHA-256 hex digest of the raw response body, computed before parsing.
    pub api_hash: String,
    /// The parsed payload, kept around for the optional `--output-json` dump.
    pub raw: serde_json::Value,
}

/// Fetch the device catalog and digest the raw payload.
///
/// HTTP error statuses are mapped to [`CatalogError::Network`] as well:
/// from the sync's point of view a 503 and a refused connection both mean
/// "the catalog is unreachable right now".
pub async fn fetch_catalog(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<FetchedCatalog, CatalogError> {
    let network = |source: reqwest::Error| CatalogError::Network {
        url: url.to_string(),
        source,
    };

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(network)?;
    let body = response.bytes().await.map_err(network)?;

    let api_hash = sha256_hex(&body);
    let raw: serde_json::Value = serde_json::from_slice(&body)?;
    let devices: Vec<Device> = serde_json::from_value(raw.clone())?;

    Ok(FetchedCatalog {
        devices,
        api_hash,
        raw,
    })
}

/// Flatten every device's image list into one deduplicated set.
pub fn required_images(devices: &[Device]) -> HashSet<String> {
    let mut required = HashSet::new();
    for device in devices {
        if device.images.is_empty() {
            tracing::debug!(
                device = device
                    .display_name
                    .as_deref()
                    .or(device.hw_model_slug.as_deref())
                    .unwrap_or("unknown"),
                hw_model = ?device.hw_model,
                "device references no images"
            );
            continue;
        }
        required.extend(device.images.iter().cloned());
    }
    required
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
