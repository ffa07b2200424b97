use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::command::CommandAllowlist;

/// Port the server listens on when none is given.
pub const DEFAULT_PORT: u16 = 24661;

/// Default directory served and written to.
pub const STORAGE_PATH: &str = "files";

/// Multipart field carrying the uploaded file.
pub const FORM_FILE: &str = "file";

/// Name prefix of in-progress upload files kept in the storage root. Listings skip them.
pub const STAGING_PREFIX: &str = ".hfs-upload-";

/// Directory prefix format used by `bydate=true` uploads (e.g. `20240131`).
pub const DATE_FORMAT: &str = "%Y%m%d";

/// Default wall-clock limit for an executed command.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Default request body limit for uploads (1 GB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

pub const WELCOME_MESSAGE: &str = "Welcome to HTTP File Server";

/// Command line arguments for the `hfs` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "HFS", bin_name = "hfs", about = "HTTP File Server", version)]
pub struct Args {
    /// Port to serve on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The directory of static files to host
    #[arg(long, default_value = STORAGE_PATH)]
    pub directory: PathBuf,

    /// Password required for upload, remove and execute
    #[arg(long)]
    pub password: Option<String>,

    /// Password required for downloads
    #[arg(long)]
    pub download_password: Option<String>,

    /// Comma-separated commands the server may execute. None by default.
    #[arg(long, default_value = "")]
    pub commands: String,

    /// Seconds an executed command may run before it is killed
    #[arg(long, default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS)]
    pub command_timeout_secs: u64,

    /// Largest accepted upload request body in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Print the bare version and exit
    #[arg(long)]
    pub get_version: bool,
}

/// Server configuration, built once at startup and shared read-only by every handler.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub storage_dir: PathBuf,
    /// Gate for upload, remove and execute.
    pub password: Option<String>,
    /// Gate for download.
    pub download_password: Option<String>,
    pub commands: CommandAllowlist,
    pub command_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            storage_dir: PathBuf::from(STORAGE_PATH),
            password: None,
            download_password: None,
            commands: CommandAllowlist::default(),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl From<&Args> for ServerConfig {
    fn from(args: &Args) -> Self {
        Self {
            port: args.port,
            storage_dir: args.directory.clone(),
            password: non_empty(args.password.as_deref()),
            download_password: non_empty(args.download_password.as_deref()),
            commands: CommandAllowlist::parse(&args.commands),
            command_timeout: Duration::from_secs(args.command_timeout_secs),
            max_upload_bytes: args.max_upload_bytes,
        }
    }
}

// An empty password means "no password", same as leaving the flag out.
fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

/// Exact shared-secret comparison. Always passes when no password is configured.
pub fn password_matches(expected: Option<&str>, supplied: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => supplied == Some(expected),
    }
}
