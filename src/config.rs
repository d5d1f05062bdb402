use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub transcode: TranscodeConfig,
    pub rooms: RoomsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "podlive".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Where recordings and flushed event logs are written
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Temp sinks and finalized live recordings
    pub lives_dir: PathBuf,
    pub speech_log_dir: PathBuf,
    pub session_log_dir: PathBuf,
    pub chat_log_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            lives_dir: PathBuf::from("recordings/lives"),
            speech_log_dir: PathBuf::from("recordings/live_logs"),
            session_log_dir: PathBuf::from("recordings/session_logs"),
            chat_log_dir: PathBuf::from("recordings/live_comments_logs"),
        }
    }
}

impl StorageConfig {
    /// All directories rooted under a single base path (used by tests and
    /// single-volume deployments)
    pub fn rooted_at(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            lives_dir: base.join("lives"),
            speech_log_dir: base.join("live_logs"),
            session_log_dir: base.join("session_logs"),
            chat_log_dir: base.join("live_comments_logs"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// ffmpeg executable (looked up on PATH when not absolute)
    pub ffmpeg_path: String,
    /// Upper bound for a single transcode; unbounded when absent
    pub timeout_secs: Option<u64>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            timeout_secs: None,
        }
    }
}

impl TranscodeConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// When an emptied room is torn down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TeardownPolicy {
    /// Only once the live session was explicitly ended and nobody is left
    #[default]
    WhenEnded,
    /// As soon as the last member leaves, live or not
    WhenEmpty,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    pub teardown: TeardownPolicy,
    /// Per-connection outbound queue depth; messages to a full queue are dropped
    pub outbound_buffer: usize,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            teardown: TeardownPolicy::default(),
            outbound_buffer: 64,
        }
    }
}

impl Config {
    /// Load from `path` (any extension the `config` crate understands),
    /// overridden by `PODLIVE__SECTION__KEY` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("PODLIVE").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
