use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::PollSchedule;
use crate::utils::{format_file_size, validate_and_normalize_url};

/// Upload limit applied before anything is sent (200 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 200 * 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Transcription service settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Job store connection; tracking is unavailable without it
    #[serde(default)]
    pub store: Option<StoreConfig>,

    /// Credentials of the signed-in user
    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// Application settings
    #[serde(default)]
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the SRT generation API
    pub base_url: String,

    /// Largest primary file accepted, in bytes
    pub max_upload_bytes: u64,

    /// Extensions accepted for the primary media file
    pub media_extensions: Vec<String>,

    /// Extensions accepted for the sample transcript
    pub transcript_extensions: Vec<String>,

    /// Extensions accepted for the sample audio
    pub audio_extensions: Vec<String>,

    /// Upload request timeout
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the job store
    pub url: String,

    /// Public API key sent with every request
    pub api_key: String,

    /// Table holding job rows
    pub table: String,

    /// Re-read jobs to emulate change notifications
    pub poll_updates: bool,

    pub poll_initial_secs: u64,
    pub poll_step_secs: u64,
    pub poll_max_secs: u64,

    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token attached to uploads and store requests
    pub access_token: Option<String>,

    /// Identifier stamped as owner of submitted jobs
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default output format for status commands
    pub default_output_format: String,

    /// Jobs listed by `recent`
    pub recent_limit: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://alizzlolp11-srt-generation-api.hf.space".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            media_extensions: to_strings(&[
                "mp3", "wav", "m4a", "aac", "flac", "mp4", "mov", "avi", "mkv", "webm",
            ]),
            transcript_extensions: to_strings(&["txt", "srt"]),
            audio_extensions: to_strings(&["mp3", "wav", "m4a", "aac", "flac"]),
            request_timeout_secs: 600,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let schedule = PollSchedule::default();
        Self {
            url: String::new(),
            api_key: String::new(),
            table: "jobs".to_string(),
            poll_updates: true,
            poll_initial_secs: schedule.initial.as_secs(),
            poll_step_secs: schedule.step.as_secs(),
            poll_max_secs: schedule.max.as_secs(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_output_format: "text".to_string(),
            recent_limit: crate::store::DEFAULT_RECENT_LIMIT,
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl StoreConfig {
    /// Re-read schedule; the first delay is never below one second
    pub fn poll_schedule(&self) -> PollSchedule {
        let initial = self.poll_initial_secs.max(1);
        PollSchedule {
            initial: Duration::from_secs(initial),
            step: Duration::from_secs(self.poll_step_secs),
            max: Duration::from_secs(self.poll_max_secs.max(initial)),
        }
    }

    /// A store is only usable with an http(s) URL
    pub fn is_usable(&self) -> bool {
        validate_and_normalize_url(&self.url).is_ok()
    }
}

/// Values given on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub store_url: Option<String>,
    pub store_key: Option<String>,
    pub access_token: Option<String>,
    pub user_id: Option<String>,
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            Ok(config)
        }
    }

    /// Load and validate a configuration file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).context("Failed to read config file")?;

        let config: Config =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("srtflow.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("srtflow").join("config.yaml"))
    }

    /// Apply command line and environment values on top of the file
    pub fn apply(mut self, overrides: Overrides) -> Result<Self> {
        if let Some(url) = overrides.api_url {
            self.service.base_url = url;
        }

        if overrides.store_url.is_some() || overrides.store_key.is_some() {
            let store = self.store.get_or_insert_with(StoreConfig::default);
            if let Some(url) = overrides.store_url {
                store.url = url;
            }
            if let Some(key) = overrides.store_key {
                store.api_key = key;
            }
        }

        if overrides.access_token.is_some() || overrides.user_id.is_some() {
            let auth = self.auth.get_or_insert_with(AuthConfig::default);
            if overrides.access_token.is_some() {
                auth.access_token = overrides.access_token;
            }
            if overrides.user_id.is_some() {
                auth.user_id = overrides.user_id;
            }
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        validate_and_normalize_url(&self.service.base_url)
            .context("Transcription service URL is invalid")?;

        if self.service.max_upload_bytes == 0 {
            anyhow::bail!("max_upload_bytes must be greater than zero");
        }

        if self.service.media_extensions.is_empty() {
            anyhow::bail!("At least one media extension must be configured");
        }

        if let Some(store) = &self.store {
            if store.poll_updates && store.poll_initial_secs == 0 {
                anyhow::bail!("store.poll_initial_secs must be at least 1 when poll_updates is on");
            }
        }

        Ok(())
    }

    /// Job store settings, if a usable store is configured
    pub fn store(&self) -> Option<&StoreConfig> {
        match &self.store {
            Some(store) if store.is_usable() => Some(store),
            Some(_) => {
                tracing::warn!("Job store URL is not an http(s) URL, job tracking disabled");
                None
            }
            None => None,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.auth
            .as_ref()
            .and_then(|auth| auth.access_token.as_deref())
            .filter(|token| !token.is_empty())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Service URL: {}", self.service.base_url);
        println!(
            "  Max Upload: {}",
            format_file_size(self.service.max_upload_bytes)
        );
        match &self.store {
            Some(store) => {
                println!("  Job Store: {}", store.url);
                println!("  Job Table: {}", store.table);
                println!("  Poll Updates: {}", store.poll_updates);
            }
            None => println!("  Job Store: (not configured)"),
        }
        let signed_in = self.access_token().is_some();
        println!("  Signed In: {}", if signed_in { "yes" } else { "no" });
        println!("  Default Format: {}", self.app.default_output_format);
    }
}
