use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::sink::SinkLayout;

/// Application configuration, resolved from the CLI.
#[derive(Debug)]
pub struct Config {
    /// Root of the asset cache; also holds the manifest.
    pub target_root: PathBuf,
    pub layout: SinkLayout,
    pub output_json: Option<PathBuf>,
    pub api_url: String,
    /// Normalized to always end with `/` so filenames append cleanly.
    pub image_base_url: String,
    pub timeout: Duration,
    pub concurrency: usize,
    pub force: bool,
    pub no_progress_bar: bool,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn normalize_base_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

impl Config {
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        // clap's arg group guarantees exactly one output mode was given.
        let (target_root, layout) = match (&cli.output_dir, &cli.output_xcassets) {
            (Some(dir), None) => (expand_tilde(dir), SinkLayout::Flat),
            (None, Some(dir)) => (expand_tilde(dir), SinkLayout::Xcassets),
            _ => anyhow::bail!("exactly one of --output-dir or --output-xcassets is required"),
        };

        Ok(Self {
            target_root,
            layout,
            output_json: cli.output_json.as_deref().map(expand_tilde),
            api_url: cli.api_url,
            image_base_url: normalize_base_url(&cli.image_base_url),
            timeout: Duration::from_secs(cli.timeout),
            concurrency: cli.concurrency.max(1),
            force: cli.force,
            no_progress_bar: cli.no_progress_bar,
        })
    }
}
