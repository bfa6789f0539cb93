use clap::Parser;

/// Device catalog endpoint.
pub const DEFAULT_API_URL: &str = "https://api.meshtastic.org/resource/deviceHardware";
/// Base URL the image filename is appended to.
pub const DEFAULT_IMAGE_BASE_URL: &str = "https://flasher.meshtastic.org/img/devices/";

#[derive(Parser, Debug)]
#[command(name = "devimg-sync", about = "Download and sync device hardware image assets")]
#[command(group(clap::ArgGroup::new("output").required(true)))]
pub struct Cli {
    /// Regular directory where images and the manifest are stored
    #[arg(long, value_name = "DIR", group = "output")]
    pub output_dir: Option<String>,

    /// .xcassets directory to populate (asset catalog layout)
    #[arg(long, value_name = "DIR", group = "output")]
    pub output_xcassets: Option<String>,

    /// If the API data has changed, save the catalog JSON to this path
    #[arg(long, value_name = "PATH")]
    pub output_json: Option<String>,

    /// Force a full sync, ignoring the API content-hash check
    #[arg(long)]
    pub force: bool,

    /// Enable detailed logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Device catalog endpoint
    #[arg(long, value_name = "URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Base URL for per-asset downloads
    #[arg(long, value_name = "URL", default_value = DEFAULT_IMAGE_BASE_URL)]
    pub image_base_url: String,

    /// Maximum concurrent asset syncs
    #[arg(long, default_value_t = 16)]
    pub concurrency: usize,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 15)]
    pub timeout: u64,
}
