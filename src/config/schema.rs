use anyhow::{Context, Result};
use directories::ProjectDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

const CONFIG_FILE_NAME: &str = "config.toml";
const DEFAULT_TRACE_REL_PATH: &str = "logs/msg.csv";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level slotkeeper configuration, loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct Config {
    /// Path of the file this config was loaded from. Computed, never serialized.
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Slot accumulation and submission (`[slots]`).
    #[serde(default)]
    pub slots: SlotConfig,

    /// Delivery rules (`[delivery]`).
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Asynchronous message tracer (`[tracer]`).
    #[serde(default)]
    pub tracer: TracerConfig,
}

// ── Slots ───────────────────────────────────────────────────────

/// Slot accumulation configuration (`[slots]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SlotConfig {
    /// Messages per slot before it is closed and submitted. Default: `1000`.
    #[serde(default = "default_window_size")]
    pub window_size: u64,
    /// Milliseconds a slot may stay open before the periodic task closes it. Default: `2000`.
    #[serde(default = "default_accumulation_timeout_ms")]
    pub accumulation_timeout_ms: u64,
    /// Delay in milliseconds between periodic submit task firings. Default: `1000`.
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    /// The first periodic firing waits `submit_timeout_ms * initial_delay_factor`
    /// so coordinator election can settle. Default: `10`.
    #[serde(default = "default_initial_delay_factor")]
    pub initial_delay_factor: u32,
    /// Upper bound in milliseconds on waiting for the periodic task at shutdown. Default: `5000`.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_window_size() -> u64 {
    1000
}

fn default_accumulation_timeout_ms() -> u64 {
    2000
}

fn default_submit_timeout_ms() -> u64 {
    1000
}

fn default_initial_delay_factor() -> u32 {
    10
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            accumulation_timeout_ms: default_accumulation_timeout_ms(),
            submit_timeout_ms: default_submit_timeout_ms(),
            initial_delay_factor: default_initial_delay_factor(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl SlotConfig {
    pub fn accumulation_timeout(&self) -> Duration {
        Duration::from_millis(self.accumulation_timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    /// Saturates at `Duration::MAX` rather than overflowing.
    pub fn initial_delay(&self) -> Duration {
        self.submit_timeout()
            .checked_mul(self.initial_delay_factor)
            .unwrap_or(Duration::MAX)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ── Delivery ────────────────────────────────────────────────────

/// Delivery rule configuration (`[delivery]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeliveryConfig {
    /// Redeliveries allowed after the first delivery. Default: `10`.
    #[serde(default = "default_max_redelivery_attempts")]
    pub max_redelivery_attempts: u32,
}

fn default_max_redelivery_attempts() -> u32 {
    10
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_redelivery_attempts: default_max_redelivery_attempts(),
        }
    }
}

// ── Tracer ──────────────────────────────────────────────────────

/// Asynchronous message tracer configuration (`[tracer]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TracerConfig {
    /// Enable CSV message tracing. Default: `false`.
    #[serde(default)]
    pub enabled: bool,
    /// Trace file. Relative paths resolve against the config directory. Default: `logs/msg.csv`.
    #[serde(default = "default_trace_path")]
    pub path: String,
    /// Seconds between draining queued events to the trace file. Default: `10`.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Seconds between rolling the trace file aside. Default: `20`.
    #[serde(default = "default_roll_interval_secs")]
    pub roll_interval_secs: u64,
    /// Events buffered before new ones are dropped. Default: `10000`.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_trace_path() -> String {
    DEFAULT_TRACE_REL_PATH.into()
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_roll_interval_secs() -> u64 {
    20
}

fn default_channel_capacity() -> usize {
    10_000
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_trace_path(),
            flush_interval_secs: default_flush_interval_secs(),
            roll_interval_secs: default_roll_interval_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl TracerConfig {
    /// Resolve the trace file path against `base_dir`.
    pub fn resolve_path(&self, base_dir: &Path) -> PathBuf {
        let raw = self.path.trim();
        if raw.is_empty() {
            return base_dir.join(DEFAULT_TRACE_REL_PATH);
        }
        let configured = PathBuf::from(raw);
        if configured.is_absolute() {
            configured
        } else {
            base_dir.join(configured)
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────

pub fn default_config_dir() -> Result<PathBuf> {
    ProjectDirs::from("", "", "slotkeeper")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .context("Could not determine a home directory for the default config location")
}

impl Config {
    /// Load `config.toml` from `config_dir` (or the platform default), writing
    /// a default file first when none exists.
    pub async fn load_or_init(config_dir: Option<&Path>) -> Result<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir.to_path_buf(),
            None => default_config_dir()?,
        };
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        fs::create_dir_all(&config_dir)
            .await
            .with_context(|| format!("Failed to create config directory {}", config_dir.display()))?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.save().await?;
            config
        } else {
            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path.clone();
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    pub async fn save(&self) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.config_path, contents)
            .await
            .with_context(|| format!("Failed to write {}", self.config_path.display()))?;
        Ok(())
    }

    /// Directory holding `config.toml`; relative paths resolve against it.
    pub fn base_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map_or_else(|| PathBuf::from("."), PathBuf::from)
    }

    /// Apply `SLOTKEEPER_*` environment overrides. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse::<u64>("SLOTKEEPER_SLOT_WINDOW_SIZE") {
            self.slots.window_size = value;
        }
        if let Some(value) = env_parse::<u64>("SLOTKEEPER_ACCUMULATION_TIMEOUT_MS") {
            self.slots.accumulation_timeout_ms = value;
        }
        if let Some(value) = env_parse::<u64>("SLOTKEEPER_SUBMIT_TIMEOUT_MS") {
            self.slots.submit_timeout_ms = value;
        }
        if let Some(value) = env_parse::<u32>("SLOTKEEPER_MAX_REDELIVERY_ATTEMPTS") {
            self.delivery.max_redelivery_attempts = value;
        }
        if let Some(value) = env_parse::<bool>("SLOTKEEPER_TRACER_ENABLED") {
            self.tracer.enabled = value;
        }
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.slots.window_size == 0 {
            anyhow::bail!("slots.window_size must be greater than 0");
        }
        if self.slots.submit_timeout_ms == 0 {
            anyhow::bail!("slots.submit_timeout_ms must be greater than 0");
        }
        if self.slots.initial_delay_factor == 0 {
            anyhow::bail!("slots.initial_delay_factor must be greater than 0");
        }
        if self.tracer.flush_interval_secs == 0 {
            anyhow::bail!("tracer.flush_interval_secs must be greater than 0");
        }
        if self.tracer.roll_interval_secs == 0 {
            anyhow::bail!("tracer.roll_interval_secs must be greater than 0");
        }
        if self.tracer.channel_capacity == 0 {
            anyhow::bail!("tracer.channel_capacity must be greater than 0");
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = trimmed, "Ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.slots.window_size, 1000);
        assert_eq!(config.slots.initial_delay(), Duration::from_secs(10));
        assert!(!config.tracer.enabled);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [slots]
            window_size = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.slots.window_size, 3);
        assert_eq!(config.slots.accumulation_timeout_ms, 2000);
        assert_eq!(config.delivery, DeliveryConfig::default());
    }

    #[test]
    fn zero_window_size_is_rejected() {
        let mut config = Config::default();
        config.slots.window_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("slots.window_size"));
    }

    #[test]
    fn zero_submit_timeout_is_rejected() {
        let mut config = Config::default();
        config.slots.submit_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_tracer_capacity_is_rejected() {
        let mut config = Config::default();
        config.tracer.channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn trace_path_resolution() {
        let base = Path::new("/etc/slotkeeper");
        let mut tracer = TracerConfig::default();
        assert_eq!(
            tracer.resolve_path(base),
            PathBuf::from("/etc/slotkeeper/logs/msg.csv")
        );

        tracer.path = "/var/log/msg.csv".into();
        assert_eq!(tracer.resolve_path(base), PathBuf::from("/var/log/msg.csv"));

        tracer.path = "  ".into();
        assert_eq!(
            tracer.resolve_path(base),
            PathBuf::from("/etc/slotkeeper/logs/msg.csv")
        );
    }

    #[test]
    fn initial_delay_saturates_instead_of_overflowing() {
        let mut config = Config::default();
        config.slots.submit_timeout_ms = u64::MAX;
        config.slots.initial_delay_factor = 2000;

        assert!(config.validate().is_ok());
        assert_eq!(config.slots.initial_delay(), Duration::MAX);

        config.slots.submit_timeout_ms = 250;
        config.slots.initial_delay_factor = 4;
        assert_eq!(config.slots.initial_delay(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn load_or_init_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_init(Some(dir.path())).await.unwrap();

        assert!(dir.path().join("config.toml").exists());
        assert_eq!(config.config_path, dir.path().join("config.toml"));
        assert_eq!(config.base_dir(), dir.path());
    }

    #[tokio::test]
    async fn load_or_init_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("config.toml"),
            "[slots]\nwindow_size = 7\naccumulation_timeout_ms = 50\n",
        )
        .await
        .unwrap();

        let config = Config::load_or_init(Some(dir.path())).await.unwrap();
        assert_eq!(config.slots.window_size, 7);
        assert_eq!(config.slots.accumulation_timeout_ms, 50);
    }

    #[tokio::test]
    async fn load_or_init_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("config.toml"), "[slots]\nwindow_size = 0\n")
            .await
            .unwrap();

        assert!(Config::load_or_init(Some(dir.path())).await.is_err());
    }
}
