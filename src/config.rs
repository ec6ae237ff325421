//! Configuration types for media-dl

use crate::error::{Error, Result};
use crate::probe::SUPPORTED_EXTENSIONS;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Download behavior configuration (directory, concurrency, chunking)
///
/// Groups settings related to how transfers are admitted and written.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrent downloads (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Extension of completed artifacts when the transcode policy doesn't pick one (default: "mp3")
    #[serde(default = "default_target_extension")]
    pub target_extension: String,

    /// Size of each write into the `.part` file; the pause flag is checked before every write (default: 64 KiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Minimum spacing between progress events when the percentage hasn't changed (default: 200ms)
    #[serde(default = "default_progress_interval")]
    pub progress_interval: Duration,

    /// Completed files smaller than this are treated as corrupt by the cleanup pass (default: 1 KiB)
    #[serde(default = "default_min_valid_file_size")]
    pub min_valid_file_size: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            target_extension: default_target_extension(),
            chunk_size: default_chunk_size(),
            progress_interval: default_progress_interval(),
            min_valid_file_size: default_min_valid_file_size(),
        }
    }
}

/// Server-side transcoding policy
///
/// The orchestrator treats the resulting URL as opaque; this only decides which
/// URL (and which target extension) a request is built with.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Target format (e.g., "opus"); None = original file
    #[serde(default)]
    pub format: Option<String>,

    /// Maximum bitrate in kbps; None = server default
    #[serde(default)]
    pub bitrate: Option<u32>,
}

impl TranscodeConfig {
    /// Append the transcode parameters to a stream URL
    ///
    /// Existing query parameters are preserved.
    pub fn source_url(&self, stream_url: &str) -> Result<String> {
        let mut url = url::Url::parse(stream_url).map_err(|e| Error::Config {
            message: format!("invalid stream URL '{}': {}", stream_url, e),
            key: None,
        })?;

        {
            let mut query = url.query_pairs_mut();
            if let Some(ref format) = self.format {
                query.append_pair("format", format);
            }
            if let Some(bitrate) = self.bitrate {
                query.append_pair("maxBitRate", &bitrate.to_string());
            }
        }

        // query_pairs_mut leaves a dangling "?" when nothing was appended
        if url.query() == Some("") {
            url.set_query(None);
        }

        Ok(url.into())
    }

    /// The extension completed files should carry under this policy
    pub fn target_extension(&self, fallback: &str) -> String {
        match self.format {
            Some(ref format) => {
                let format = format.to_ascii_lowercase();
                if SUPPORTED_EXTENSIONS.contains(&format.as_str()) {
                    format
                } else {
                    fallback.to_string()
                }
            }
            None => fallback.to_string(),
        }
    }
}

/// HTTP client settings
///
/// There is no orchestrator-level transfer deadline; stalled connections are
/// bounded only by these timeouts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// TCP/TLS connect timeout (default: 15s)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Per-read inactivity timeout (default: 30s)
    #[serde(default = "default_read_timeout")]
    pub read_timeout: Duration,

    /// User-Agent header (default: "media-dl/<version>")
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./media-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for MediaDownloader
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) - directory, concurrency, chunking (flattened)
/// - [`transcode`](TranscodeConfig) - source URL / target extension policy
/// - [`http`](HttpConfig) - client timeouts
/// - [`persistence`](PersistenceConfig) - database location
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Transcoding policy
    #[serde(default)]
    pub transcode: TranscodeConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load a JSON configuration file and validate it
    ///
    /// Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Extension new tasks are written with, after applying the transcode policy
    pub fn target_extension(&self) -> String {
        self.transcode
            .target_extension(&self.download.target_extension)
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".to_string(),
                key: Some("max_concurrent_downloads".to_string()),
            });
        }

        if self.download.chunk_size == 0 {
            return Err(Error::Config {
                message: "chunk_size must be at least 1 byte".to_string(),
                key: Some("chunk_size".to_string()),
            });
        }

        let ext = self.download.target_extension.to_ascii_lowercase();
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(Error::Config {
                message: format!(
                    "target_extension '{}' is not one of {:?}",
                    self.download.target_extension, SUPPORTED_EXTENSIONS
                ),
                key: Some("target_extension".to_string()),
            });
        }

        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_target_extension() -> String {
    "mp3".to_string()
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_min_valid_file_size() -> u64 {
    1024
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("media-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./media-dl.db")
}
