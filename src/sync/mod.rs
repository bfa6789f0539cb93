//! Sync engine — per-asset validation state machine, bounded-concurrency
//! coordinator, and the pruning pass.
//!
//! Each required filename is synced independently: a HEAD probe extracts a
//! remote cache validator, the validator is diffed against the manifest,
//! and the body is only transferred when the asset is new or changed.
//! Workers return immutable [`SyncOutcome`] values; the coordinator is the
//! sole writer of the aggregate stats and the manifest under construction,
//! so no shared collection needs a lock.

pub mod error;

use std::collections::{BTreeMap, HashSet};
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;

use crate::manifest::{FileEntry, Manifest};
use crate::sink::AssetSink;
use error::AssetError;

/// What the sync decided to do with one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    New,
    Updated,
    Skipped,
}

/// Per-asset result returned by a worker to the coordinator.
#[derive(Debug)]
pub struct SyncOutcome {
    pub filename: String,
    /// On success: the action taken plus the validator to persist.
    pub result: Result<(SyncAction, String), AssetError>,
}

/// End-of-run counters. Mutated only by the coordinator.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub new: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// Knobs for the sync pass, decoupled from CLI parsing.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Base URL the asset filename is appended to. Always ends with `/`.
    pub image_base_url: String,
    pub timeout: Duration,
    pub concurrency: usize,
    pub no_progress_bar: bool,
}

/// Decide the action for one asset from its manifest entry, physical
/// presence, and the probed remote validator.
///
/// A manifest entry whose file has vanished from disk is treated the same
/// as an unknown asset: the entry alone proves nothing about local state.
fn decide_action(entry: Option<&FileEntry>, locally_present: bool, remote_etag: &str) -> SyncAction {
    match entry {
        None => SyncAction::New,
        Some(_) if !locally_present => SyncAction::New,
        Some(entry) if entry.etag != remote_etag => SyncAction::Updated,
        Some(_) => SyncAction::Skipped,
    }
}

/// Synthesize a validator for a server that sent neither `ETag` nor
/// `Last-Modified`. The random component guarantees a mismatch with any
/// stored token, so the asset is re-downloaded every run until the server
/// starts sending a real validator.
fn synthesize_token() -> String {
    let nonce: [u8; 8] = rand::random();
    let hex: String = nonce.iter().map(|b| format!("{:02x}", b)).collect();
    format!("force-update-{}", hex)
}

/// HEAD the asset URL and extract a cache validator, preferring the strong
/// one. Returns `None` when the server answered OK with neither header.
///
/// An error status is a failed probe, same as a connection failure: the
/// asset's freshness is unknown and no local state may be touched. Headers
/// on an error response (some CDNs attach an `ETag` to 404 pages) must not
/// be mistaken for a valid cache validator.
async fn probe_validator(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<Option<String>, AssetError> {
    let response = client
        .head(url)
        .timeout(timeout)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|source| AssetError::Probe {
            url: url.to_string(),
            source,
        })?;

    let header = |name: reqwest::header::HeaderName| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Ok(header(reqwest::header::ETAG).or_else(|| header(reqwest::header::LAST_MODIFIED)))
}

/// Validate a response's status and declared content type before the body
/// is trusted as image data.
fn validate_image_response(
    status: u16,
    content_type: Option<&str>,
    url: &str,
) -> Result<(), AssetError> {
    if !(200..300).contains(&status) {
        return Err(AssetError::HttpStatus {
            status,
            url: url.to_string(),
        });
    }
    let content_type = content_type.unwrap_or("").to_ascii_lowercase();
    if !content_type.starts_with("image/") {
        return Err(AssetError::ContentType {
            content_type,
            url: url.to_string(),
        });
    }
    Ok(())
}

/// GET the asset body, validate it, and write it through the sink.
/// All-or-nothing: any failure here leaves the sink entry to be rolled
/// back by the caller.
async fn fetch_and_store(
    client: &Client,
    url: &str,
    timeout: Duration,
    sink: &dyn AssetSink,
    filename: &str,
) -> Result<(), AssetError> {
    let transport = |source: reqwest::Error| AssetError::Transport {
        url: url.to_string(),
        source,
    };

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(transport)?;

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    validate_image_response(response.status().as_u16(), content_type.as_deref(), url)?;

    let bytes = response.bytes().await.map_err(transport)?;
    sink.write(filename, &bytes).await?;
    Ok(())
}

/// Sync a single asset: probe, diff, and download if stale.
///
/// Owns no shared state beyond the read-only manifest snapshot and the
/// sink path for `filename`, so any number of these run concurrently.
async fn sync_asset(
    client: Client,
    options: Arc<SyncOptions>,
    manifest: Arc<Manifest>,
    sink: Arc<dyn AssetSink>,
    filename: String,
) -> Result<(SyncAction, String), AssetError> {
    let url = format!("{}{}", options.image_base_url, filename);
    tracing::debug!(%filename, "processing asset");

    let remote_etag = match probe_validator(&client, &url, options.timeout).await? {
        Some(token) => token,
        None => {
            tracing::warn!(
                "No ETag or Last-Modified for {}. Forcing update.",
                filename
            );
            synthesize_token()
        }
    };

    let action = decide_action(
        manifest.files.get(&filename),
        sink.exists(&filename),
        &remote_etag,
    );

    match action {
        SyncAction::Skipped => {
            tracing::debug!(%filename, "up to date, skipping");
            return Ok((SyncAction::Skipped, remote_etag));
        }
        SyncAction::New => tracing::debug!(%filename, "new asset, downloading"),
        SyncAction::Updated => tracing::debug!(%filename, "validator mismatch, updating"),
    }

    if let Err(e) = fetch_and_store(&client, &url, options.timeout, sink.as_ref(), &filename).await
    {
        // A half-downloaded asset must never remain on disk. Removal also
        // drops the previous content for `updated` assets; the absence check
        // re-downloads them as `new` next run.
        if let Err(remove_err) = sink.remove(&filename).await {
            tracing::warn!(
                "Could not roll back sink entry for {}: {}",
                filename,
                remove_err
            );
        }
        return Err(e);
    }

    Ok((action, remote_etag))
}

/// Fold one worker outcome into the stats and the new manifest mapping.
///
/// Failed assets keep their *previous* manifest entry (when one exists) so
/// a transient failure does not erase a good cache-validity record; the
/// physical file may still be absent, which forces a `new` retry next run.
fn apply_outcome(
    previous: &Manifest,
    files: &mut BTreeMap<String, FileEntry>,
    stats: &mut SyncStats,
    outcome: SyncOutcome,
) {
    match outcome.result {
        Ok((action, etag)) => {
            match action {
                SyncAction::New => stats.new += 1,
                SyncAction::Updated => stats.updated += 1,
                SyncAction::Skipped => stats.skipped += 1,
            }
            files.insert(outcome.filename, FileEntry { etag });
        }
        Err(e) => {
            stats.failed += 1;
            if e.is_validation() {
                tracing::warn!("Download rejected for {}: {}", outcome.filename, e);
            } else {
                tracing::warn!("Sync failed for {}: {}", outcome.filename, e);
            }
            if let Some(old) = previous.files.get(&outcome.filename) {
                files.insert(outcome.filename, old.clone());
            }
        }
    }
}

/// Progress bar over the asset pool; hidden for non-TTY output or when the
/// user asked for none.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("valid template")
            .progress_chars("=> "),
    );
    pb
}

/// Run the concurrent sync pass over every required filename.
///
/// Workers are spawned tasks consumed in completion order through a bounded
/// `buffer_unordered` window; a panicking worker surfaces as a `JoinError`
/// and is downgraded to a `failed` outcome rather than aborting the pool.
/// Returns the aggregate stats and the new manifest `files` mapping.
pub async fn run_sync_pass(
    client: &Client,
    options: &SyncOptions,
    previous: &Manifest,
    sink: Arc<dyn AssetSink>,
    required: &HashSet<String>,
) -> (SyncStats, BTreeMap<String, FileEntry>) {
    let mut stats = SyncStats::default();
    let mut files: BTreeMap<String, FileEntry> = BTreeMap::new();

    let manifest_snapshot = Arc::new(previous.clone());
    let shared_options = Arc::new(options.clone());
    let pb = create_progress_bar(options.no_progress_bar, required.len() as u64);

    let mut outcomes = stream::iter(required.iter().cloned())
        .map(|filename| {
            let client = client.clone();
            let options = shared_options.clone();
            let manifest = manifest_snapshot.clone();
            let sink = sink.clone();
            async move {
                let handle = tokio::spawn(sync_asset(
                    client,
                    options,
                    manifest,
                    sink,
                    filename.clone(),
                ));
                (filename, handle.await)
            }
        })
        .buffer_unordered(options.concurrency.max(1));

    while let Some((filename, joined)) = outcomes.next().await {
        pb.set_message(filename.clone());
        let outcome = match joined {
            Ok(result) => SyncOutcome { filename, result },
            Err(join_err) => {
                pb.suspend(|| {
                    tracing::warn!(
                        "Unexpected panic while processing {}: {}",
                        filename,
                        join_err
                    );
                });
                stats.failed += 1;
                if let Some(old) = previous.files.get(&filename) {
                    files.insert(filename, old.clone());
                }
                pb.inc(1);
                continue;
            }
        };
        pb.suspend(|| apply_outcome(previous, &mut files, &mut stats, outcome));
        pb.inc(1);
    }

    pb.finish_and_clear();
    (stats, files)
}

/// Remove sink entries for assets listed in the previous manifest but no
/// longer required. Uses the *previous* manifest's filenames as the only
/// candidate source and runs strictly after the concurrent pass.
pub async fn prune(
    previous: &Manifest,
    required: &HashSet<String>,
    sink: &dyn AssetSink,
) -> usize {
    let mut pruned = 0;
    for filename in previous.files.keys() {
        if required.contains(filename) {
            continue;
        }
        tracing::debug!(%filename, "pruning");
        if let Err(e) = sink.remove(filename).await {
            tracing::warn!("Could not prune {}: {}", filename, e);
        }
        pruned += 1;
    }
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{test_tmp_dir, FlatSink, XcassetsSink};

    fn entry(etag: &str) -> FileEntry {
        FileEntry {
            etag: etag.to_string(),
        }
    }

    fn manifest_with(entries: &[(&str, &str)]) -> Manifest {
        let mut manifest = Manifest::default();
        for (name, etag) in entries {
            manifest.files.insert(name.to_string(), entry(etag));
        }
        manifest
    }

    #[test]
    fn decide_new_when_unknown() {
        assert_eq!(decide_action(None, false, "v1"), SyncAction::New);
        // Present on disk but never recorded: still new.
        assert_eq!(decide_action(None, true, "v1"), SyncAction::New);
    }

    #[test]
    fn decide_new_when_file_vanished() {
        // Manifest remembers the asset but the file is gone.
        assert_eq!(decide_action(Some(&entry("v1")), false, "v1"), SyncAction::New);
    }

    #[test]
    fn decide_updated_on_validator_mismatch() {
        assert_eq!(
            decide_action(Some(&entry("v1")), true, "v2"),
            SyncAction::Updated
        );
    }

    #[test]
    fn decide_skipped_when_current() {
        assert_eq!(
            decide_action(Some(&entry("v1")), true, "v1"),
            SyncAction::Skipped
        );
    }

    #[test]
    fn synthesized_tokens_never_collide() {
        let a = synthesize_token();
        let b = synthesize_token();
        assert!(a.starts_with("force-update-"));
        assert_ne!(a, b);
    }

    #[test]
    fn validate_accepts_image_content_types() {
        assert!(validate_image_response(200, Some("image/png"), "u").is_ok());
        assert!(validate_image_response(200, Some("IMAGE/SVG+XML"), "u").is_ok());
        assert!(validate_image_response(200, Some("image/webp; charset=binary"), "u").is_ok());
    }

    #[test]
    fn validate_rejects_error_pages_and_statuses() {
        let err = validate_image_response(200, Some("text/html"), "u").unwrap_err();
        assert!(matches!(err, AssetError::ContentType { .. }));

        let err = validate_image_response(200, None, "u").unwrap_err();
        assert!(matches!(err, AssetError::ContentType { .. }));

        let err = validate_image_response(404, Some("image/png"), "u").unwrap_err();
        assert!(matches!(err, AssetError::HttpStatus { status: 404, .. }));

        let err = validate_image_response(500, Some("image/png"), "u").unwrap_err();
        assert!(matches!(err, AssetError::HttpStatus { status: 500, .. }));
    }

    #[test]
    fn apply_outcome_counts_and_records_token() {
        let previous = Manifest::default();
        let mut files = BTreeMap::new();
        let mut stats = SyncStats::default();

        apply_outcome(
            &previous,
            &mut files,
            &mut stats,
            SyncOutcome {
                filename: "device-a.png".into(),
                result: Ok((SyncAction::New, "\"tok\"".into())),
            },
        );

        assert_eq!(stats.new, 1);
        assert_eq!(files["device-a.png"].etag, "\"tok\"");
    }

    #[test]
    fn apply_outcome_carries_previous_entry_on_failure() {
        let previous = manifest_with(&[("device-c.png", "v1")]);
        let mut files = BTreeMap::new();
        let mut stats = SyncStats::default();

        apply_outcome(
            &previous,
            &mut files,
            &mut stats,
            SyncOutcome {
                filename: "device-c.png".into(),
                result: Err(AssetError::ContentType {
                    content_type: "text/html".into(),
                    url: "u".into(),
                }),
            },
        );

        assert_eq!(stats.failed, 1);
        // The old validity record survives the transient failure unchanged.
        assert_eq!(files["device-c.png"].etag, "v1");
    }

    #[test]
    fn apply_outcome_failure_without_history_leaves_no_entry() {
        let previous = Manifest::default();
        let mut files = BTreeMap::new();
        let mut stats = SyncStats::default();

        apply_outcome(
            &previous,
            &mut files,
            &mut stats,
            SyncOutcome {
                filename: "fresh.png".into(),
                result: Err(AssetError::HttpStatus {
                    status: 502,
                    url: "u".into(),
                }),
            },
        );

        assert_eq!(stats.failed, 1);
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn prune_removes_only_unrequired_entries() {
        let root = test_tmp_dir("prune_flat");
        let sink = FlatSink::new(root.clone());
        sink.write("old.png", b"stale").await.unwrap();
        sink.write("kept.png", b"fresh").await.unwrap();

        let previous = manifest_with(&[("old.png", "v1"), ("kept.png", "v1")]);
        let required: HashSet<String> = ["kept.png".to_string()].into();

        let pruned = prune(&previous, &required, &sink).await;
        assert_eq!(pruned, 1);
        assert!(!sink.exists("old.png"));
        assert!(sink.exists("kept.png"));
    }

    #[tokio::test]
    async fn prune_is_idempotent_for_missing_entries() {
        let sink = FlatSink::new(test_tmp_dir("prune_missing"));
        let previous = manifest_with(&[("ghost.png", "v1")]);
        let required = HashSet::new();

        // Entry listed in the manifest but never on disk: still counted,
        // never an error.
        assert_eq!(prune(&previous, &required, &sink).await, 1);
        assert_eq!(prune(&previous, &required, &sink).await, 1);
    }

    fn unreachable_options() -> SyncOptions {
        // Port 1 is never listening; connections fail fast.
        SyncOptions {
            image_base_url: "http://127.0.0.1:1/".into(),
            timeout: Duration::from_millis(500),
            concurrency: 4,
            no_progress_bar: true,
        }
    }

    #[tokio::test]
    async fn probe_failure_touches_no_local_state() {
        let root = test_tmp_dir("probe_failure");
        let _ = std::fs::remove_file(root.join("x.png"));
        let sink: Arc<dyn AssetSink> = Arc::new(FlatSink::new(root));
        let result = sync_asset(
            Client::new(),
            Arc::new(unreachable_options()),
            Arc::new(Manifest::default()),
            sink.clone(),
            "x.png".into(),
        )
        .await;

        assert!(matches!(result.unwrap_err(), AssetError::Probe { .. }));
        assert!(!sink.exists("x.png"));
    }

    /// Serve one canned HTTP response per incoming connection, then stop.
    /// Responses carry `Connection: close` so the client opens a fresh
    /// connection per request instead of reusing a pooled one.
    fn canned_server(responses: Vec<String>) -> std::net::SocketAddr {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for response in responses {
                let (mut socket, _) = listener.accept().unwrap();
                let mut request = Vec::new();
                let mut chunk = [0u8; 512];
                loop {
                    let n = socket.read(&mut chunk).unwrap();
                    request.extend_from_slice(&chunk[..n]);
                    if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                socket.write_all(response.as_bytes()).unwrap();
            }
        });
        addr
    }

    fn server_options(addr: std::net::SocketAddr) -> SyncOptions {
        SyncOptions {
            image_base_url: format!("http://{}/", addr),
            timeout: Duration::from_secs(5),
            concurrency: 1,
            no_progress_bar: true,
        }
    }

    #[tokio::test]
    async fn error_status_probe_fails_without_touching_cache() {
        let addr = canned_server(vec![
            // 404 on HEAD, complete with an ETag that must be ignored.
            "HTTP/1.1 404 Not Found\r\nETag: \"v1\"\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
        ]);

        let root = test_tmp_dir("probe_404");
        let sink: Arc<dyn AssetSink> = Arc::new(FlatSink::new(root.clone()));
        sink.write("good.png", b"cached").await.unwrap();

        let result = sync_asset(
            Client::new(),
            Arc::new(server_options(addr)),
            Arc::new(manifest_with(&[("good.png", "\"v1\"")])),
            sink.clone(),
            "good.png".into(),
        )
        .await;

        assert!(matches!(result.unwrap_err(), AssetError::Probe { .. }));
        // The previously good cached file survives the failed probe.
        assert!(sink.exists("good.png"));
        assert_eq!(std::fs::read(root.join("good.png")).unwrap(), b"cached");
    }

    #[tokio::test]
    async fn html_error_page_rolls_back_sink_entry() {
        let body = "<html>not found</html>";
        let addr = canned_server(vec![
            "HTTP/1.1 200 OK\r\nETag: \"v2\"\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
            // Error page mistakenly served as 200.
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            ),
        ]);

        let sink: Arc<dyn AssetSink> = Arc::new(FlatSink::new(test_tmp_dir("rollback_html")));
        let result = sync_asset(
            Client::new(),
            Arc::new(server_options(addr)),
            Arc::new(Manifest::default()),
            sink.clone(),
            "device-c.png".into(),
        )
        .await;

        assert!(matches!(result.unwrap_err(), AssetError::ContentType { .. }));
        // No half-written asset remains after the rejected download.
        assert!(!sink.exists("device-c.png"));
    }

    #[tokio::test]
    async fn valid_download_writes_through_sink() {
        let body = "PNGDATA";
        let addr = canned_server(vec![
            "HTTP/1.1 200 OK\r\nETag: \"v2\"\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            ),
        ]);

        let root = test_tmp_dir("download_ok");
        let _ = std::fs::remove_file(root.join("device-b.png"));
        let sink: Arc<dyn AssetSink> = Arc::new(FlatSink::new(root));

        let (action, etag) = sync_asset(
            Client::new(),
            Arc::new(server_options(addr)),
            Arc::new(Manifest::default()),
            sink.clone(),
            "device-b.png".into(),
        )
        .await
        .unwrap();

        assert_eq!(action, SyncAction::New);
        assert_eq!(etag, "\"v2\"");
        assert!(sink.exists("device-b.png"));
    }

    #[tokio::test]
    async fn run_sync_pass_contains_failures_and_carries_history() {
        let sink: Arc<dyn AssetSink> = Arc::new(FlatSink::new(test_tmp_dir("pass_failures")));
        let previous = manifest_with(&[("known.png", "v1")]);
        let required: HashSet<String> =
            ["known.png".to_string(), "unknown.png".to_string()].into();

        let (stats, files) = run_sync_pass(
            &Client::new(),
            &unreachable_options(),
            &previous,
            sink,
            &required,
        )
        .await;

        // Both probes fail, neither aborts the pass.
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.new + stats.updated + stats.skipped, 0);
        // Only the asset with history keeps its manifest entry.
        assert_eq!(files.len(), 1);
        assert_eq!(files["known.png"].etag, "v1");
    }

    #[tokio::test]
    async fn prune_removes_imageset_bundles() {
        let root = test_tmp_dir("prune_xcassets");
        let sink = XcassetsSink::new(root.clone());
        sink.write("retired.png", b"img").await.unwrap();

        let previous = manifest_with(&[("retired.png", "v1")]);
        let pruned = prune(&previous, &HashSet::new(), &sink).await;

        assert_eq!(pruned, 1);
        assert!(!root.join("retired.imageset").exists());
    }
}
