/// Backend and pipeline configuration
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_VIDEO_MODEL: &str = "veo-3.1-fast-generate-preview";
pub const DEFAULT_APP_NAME: &str = "corkbrick";
pub const DEFAULT_HOST_KEY_ENV: &str = "GEMINI_API_KEY";

/// Backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Google Gemini REST API
    Gemini,
    /// Offline scripted backend
    Mock,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

/// Which family of models the pipeline uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMode {
    #[default]
    Standard,
    Advanced,
}

/// Models backing one mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSet {
    pub label: &'static str,
    pub image_model: &'static str,
    pub text_model: &'static str,
}

impl ModelMode {
    pub fn models(self) -> ModelSet {
        match self {
            ModelMode::Standard => ModelSet {
                label: "Standard (Flash)",
                image_model: "gemini-2.5-flash-image",
                text_model: "gemini-2.5-flash",
            },
            ModelMode::Advanced => ModelSet {
                label: "Advanced (Pro)",
                image_model: "gemini-3-pro-image-preview",
                text_model: "gemini-3-pro-preview",
            },
        }
    }
}

impl std::fmt::Display for ModelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Advanced => write!(f, "advanced"),
        }
    }
}

impl std::str::FromStr for ModelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "flash" => Ok(ModelMode::Standard),
            "advanced" | "pro" => Ok(ModelMode::Advanced),
            other => Err(format!("unknown model mode `{other}` (expected standard or advanced)")),
        }
    }
}

/// Video status polling schedule.
///
/// Delays start at `interval_ms` and grow by `backoff` up to `max_interval_ms`.
/// `max_attempts: None` polls until the backend reports completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff: f64,
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            max_interval_ms: 30_000,
            backoff: 1.5,
            max_attempts: Some(120),
        }
    }
}

impl PollPolicy {
    /// Fixed-interval polling with no attempt cap
    pub fn unbounded(interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        Self {
            interval_ms: ms,
            max_interval_ms: ms,
            backoff: 1.0,
            max_attempts: None,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn next_delay(&self, current: Duration) -> Duration {
        let factor = if self.backoff.is_finite() && self.backoff >= 1.0 {
            self.backoff
        } else {
            1.0
        };
        let next = (current.as_millis() as f64 * factor) as u64;
        Duration::from_millis(next.min(self.max_interval_ms.max(self.interval_ms)))
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend type
    pub backend_type: BackendType,

    /// API endpoint URL
    pub api_base: String,

    /// Prefix of the session and durable storage keys
    pub app_name: String,

    /// Model family used for image and text calls
    pub mode: ModelMode,

    /// Model used for video jobs
    pub video_model: String,

    /// Environment variable holding a host-managed key
    pub host_key_env: Option<String>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,

    /// Video polling schedule
    pub poll: PollPolicy,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(BackendType::Gemini)
    }
}

impl BackendConfig {
    /// Create new backend config
    pub fn new(backend_type: BackendType) -> Self {
        Self {
            backend_type,
            api_base: GEMINI_API_BASE.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            mode: ModelMode::Standard,
            video_model: DEFAULT_VIDEO_MODEL.to_string(),
            host_key_env: Some(DEFAULT_HOST_KEY_ENV.to_string()),
            request_timeout_secs: Some(300),
            poll: PollPolicy::default(),
        }
    }

    /// With API endpoint
    pub fn with_api_base(mut self, url: String) -> Self {
        self.api_base = url;
        self
    }

    /// With model mode
    pub fn with_mode(mut self, mode: ModelMode) -> Self {
        self.mode = mode;
        self
    }

    /// With app name (storage key prefix)
    pub fn with_app_name(mut self, name: String) -> Self {
        self.app_name = name;
        self
    }

    /// With polling schedule
    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// With timeout
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    /// Session storage key of the user credential
    pub fn session_key(&self) -> String {
        format!("{}-user-api-key", self.app_name)
    }

    /// Save configuration to JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write backend config {}", path.display()))?;
        Ok(())
    }

    /// Load configuration from JSON
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read backend config {}", path.display()))?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_config() {
        let config = BackendConfig::new(BackendType::Mock)
            .with_api_base("http://localhost:9000".to_string())
            .with_mode(ModelMode::Advanced)
            .with_timeout(10);

        assert_eq!(config.backend_type, BackendType::Mock);
        assert_eq!(config.api_base, "http://localhost:9000");
        assert_eq!(config.mode.models().image_model, "gemini-3-pro-image-preview");
        assert_eq!(config.request_timeout_secs, Some(10));
        assert_eq!(config.session_key(), "corkbrick-user-api-key");
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.json");
        let config = BackendConfig::default().with_app_name("demo".to_string());
        config.save(&path).unwrap();

        let loaded = BackendConfig::load(&path).unwrap();
        assert_eq!(loaded.app_name, "demo");
        assert_eq!(loaded.poll, PollPolicy::default());
    }

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("Advanced".parse::<ModelMode>().unwrap(), ModelMode::Advanced);
        assert_eq!("flash".parse::<ModelMode>().unwrap(), ModelMode::Standard);
        assert!("turbo".parse::<ModelMode>().is_err());
        assert_eq!(ModelMode::Standard.to_string(), "standard");
        assert_eq!(BackendType::Gemini.to_string(), "gemini");
    }

    #[test]
    fn test_poll_backoff_is_capped() {
        let poll = PollPolicy::default();
        let mut delay = poll.initial_delay();
        assert_eq!(delay, Duration::from_millis(5_000));
        delay = poll.next_delay(delay);
        assert_eq!(delay, Duration::from_millis(7_500));
        for _ in 0..10 {
            delay = poll.next_delay(delay);
        }
        assert_eq!(delay, Duration::from_millis(30_000));

        assert!(!poll.exhausted(119));
        assert!(poll.exhausted(120));
        assert!(!PollPolicy::unbounded(Duration::from_secs(5)).exhausted(u32::MAX));
    }
}
