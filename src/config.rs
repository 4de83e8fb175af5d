//! Configuration types for downsonic

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

/// Format value asking the server not to transcode
pub const RAW_FORMAT: &str = "raw";

/// Upper bound for the default worker count
const MAX_DEFAULT_CONCURRENCY: usize = 32;

/// Server-side transcoding parameters sent with every stream request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeOptions {
    /// Target format (e.g. "mp3", "flac", "aac", or "raw" for no transcoding)
    #[serde(default)]
    pub format: Option<String>,

    /// Bitrate ceiling in kbps (None = no limit)
    #[serde(default)]
    pub max_bitrate_kbps: Option<u32>,
}

impl TranscodeOptions {
    /// Create transcoding options from raw CLI values.
    ///
    /// A bitrate of `0` means no limit; an empty format is treated as unset.
    pub fn new(format: Option<String>, bitrate_kbps: Option<u32>) -> Self {
        Self {
            format: format
                .map(|f| f.trim().to_ascii_lowercase())
                .filter(|f| !f.is_empty()),
            max_bitrate_kbps: bitrate_kbps.filter(|b| *b > 0),
        }
    }

    /// The explicitly requested transcode target, if any.
    ///
    /// Returns `None` when no format was configured or when `raw` was requested.
    pub fn target_format(&self) -> Option<&str> {
        self.format
            .as_deref()
            .filter(|f| !f.eq_ignore_ascii_case(RAW_FORMAT))
    }

    /// Whether the server is explicitly asked to serve the original file
    pub fn is_raw(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case(RAW_FORMAT))
    }
}

/// Retry behavior for transient per-track stream failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 500 ms)
    #[serde(default = "default_initial_delay", with = "duration_millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

/// Configuration for one synchronization run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Local directory the library is mirrored into (must already exist)
    pub destination: PathBuf,

    /// Transcoding parameters for every stream request
    #[serde(default)]
    pub transcode: TranscodeOptions,

    /// Extension override applied to every track (None = infer per track)
    #[serde(default)]
    pub extension: Option<String>,

    /// Maximum number of concurrent transfers (default: min(32, CPUs + 4))
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Re-download tracks whose destination file already exists
    #[serde(default)]
    pub force: bool,

    /// Retry behavior for transient stream failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Create a configuration with defaults for everything but the destination
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            transcode: TranscodeOptions::default(),
            extension: None,
            concurrency: default_concurrency(),
            force: false,
            retry: RetryConfig::default(),
        }
    }

    /// The extension override without a leading dot, if configured
    pub fn extension_override(&self) -> Option<&str> {
        self.extension
            .as_deref()
            .map(|e| e.trim().trim_start_matches('.'))
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::config(
                "concurrency",
                "number of threads must be at least 1",
            ));
        }
        if let Some(ext) = self.extension_override() {
            if ext.is_empty() {
                return Err(Error::config("extension", "extension must not be empty"));
            }
            if ext.contains(['/', '\\']) {
                return Err(Error::config(
                    "extension",
                    format!("extension '{ext}' must not contain path separators"),
                ));
            }
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }
}

/// Location of a Subsonic server, parsed from the user-supplied source string
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerAddress {
    /// "http" or "https"
    pub scheme: String,
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Path prefix the server is mounted under ("" when at the root)
    pub path: String,
}

impl ServerAddress {
    /// Parse `[http[s]://]host[:port][/path]`.
    ///
    /// The port defaults to 443 for https, 80 for http and 8080 when no scheme
    /// is given. Without a scheme, https is assumed only for port 443.
    pub fn parse(source: &str) -> Result<Self> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| {
                Regex::new(r"^(?:(https?)://)?([^:/?#\s]+)(?::(\d{1,5}))?(/[^?#\s]*)?$").ok()
            })
            .as_ref()
            .ok_or_else(|| Error::Other("source address pattern failed to compile".into()))?;

        let invalid = || Error::config("source", format!("unable to parse url '{source}'"));

        let caps = pattern.captures(source.trim()).ok_or_else(invalid)?;
        let scheme = caps.get(1).map(|m| m.as_str().to_string());
        let host = caps.get(2).ok_or_else(invalid)?.as_str().to_string();
        let port = match caps.get(3) {
            Some(m) => m.as_str().parse::<u16>().map_err(|_| invalid())?,
            None => match scheme.as_deref() {
                Some("https") => 443,
                Some(_) => 80,
                None => 8080,
            },
        };
        let scheme = scheme.unwrap_or_else(|| {
            if port == 443 { "https" } else { "http" }.to_string()
        });
        let path = caps
            .get(4)
            .map(|m| m.as_str().trim_end_matches('/').to_string())
            .unwrap_or_default();

        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    /// Base URL every API endpoint is resolved against
    pub fn base_url(&self) -> Result<Url> {
        let raw = format!("{}://{}:{}{}/", self.scheme, self.host, self.port, self.path);
        Url::parse(&raw).map_err(|e| Error::config("source", format!("invalid url '{raw}': {e}")))
    }
}

impl std::fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() + 4)
        .unwrap_or(5)
        .min(MAX_DEFAULT_CONCURRENCY)
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
