use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// File name of the persisted settings inside the config directory.
pub const CONFIG_FILE_NAME: &str = "audio-mirror.toml";

/// Environment variable that overrides the config directory.
pub const CONFIG_DIR_ENV: &str = "AUDIO_MIRROR_CONFIG_DIR";

/// Reasons a configuration is rejected by [`Config::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("device {0} is selected as both input and output")]
    InputIsOutput(String),

    #[error("startup.ready_attempts must be at least 1")]
    NoReadyAttempts,

    #[error("stream.{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub config_version: i32,
    /// Loopback source; `None` means mirroring stays stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_input: Option<String>,
    #[serde(default)]
    pub selected_outputs: BTreeSet<String>,
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub startup: StartupPolicy,
    #[serde(default)]
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct General {
    #[serde(default)]
    pub start_paused: bool, // Begin with the capture held
    #[serde(default = "default_true")]
    pub auto_start: bool, // Start mirroring at launch once devices are ready
}

/// Bounded wait for the selected devices at launch and after resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupPolicy {
    #[serde(default = "default_ready_attempts")]
    pub ready_attempts: u32,
    #[serde(default = "default_ready_interval_ms")]
    pub ready_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_capture_buffer_ms")]
    pub capture_buffer_ms: u32,
    #[serde(default = "default_render_latency_ms")]
    pub render_latency_ms: u32,
    /// Upper bound of audio queued per output before the oldest bytes are dropped.
    #[serde(default = "default_max_queue_ms")]
    pub max_queue_ms: u32,
}

fn default_true() -> bool {
    true
}

fn default_ready_attempts() -> u32 {
    10
}

fn default_ready_interval_ms() -> u64 {
    5000
}

fn default_capture_buffer_ms() -> u32 {
    100
}

fn default_render_latency_ms() -> u32 {
    5
}

fn default_max_queue_ms() -> u32 {
    200
}

impl Default for General {
    fn default() -> Self {
        Self {
            start_paused: false,
            auto_start: true,
        }
    }
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self {
            ready_attempts: default_ready_attempts(),
            ready_interval_ms: default_ready_interval_ms(),
        }
    }
}

impl StartupPolicy {
    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            capture_buffer_ms: default_capture_buffer_ms(),
            render_latency_ms: default_render_latency_ms(),
            max_queue_ms: default_max_queue_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: 1,
            selected_input: None,
            selected_outputs: BTreeSet::new(),
            general: General::default(),
            startup: StartupPolicy::default(),
            stream: StreamSettings::default(),
        }
    }
}

impl Config {
    /// Drop the selected input from the output set. Returns true if anything changed.
    pub fn normalize(&mut self) -> bool {
        match &self.selected_input {
            Some(input) => self.selected_outputs.remove(input),
            None => false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(input) = &self.selected_input {
            if self.selected_outputs.contains(input) {
                return Err(ConfigError::InputIsOutput(input.clone()));
            }
        }
        if self.startup.ready_attempts == 0 {
            return Err(ConfigError::NoReadyAttempts);
        }
        if self.stream.capture_buffer_ms == 0 {
            return Err(ConfigError::ZeroDuration("capture_buffer_ms"));
        }
        if self.stream.render_latency_ms == 0 {
            return Err(ConfigError::ZeroDuration("render_latency_ms"));
        }
        if self.stream.max_queue_ms == 0 {
            return Err(ConfigError::ZeroDuration("max_queue_ms"));
        }
        Ok(())
    }
}

/// Manager providing thread-safe access and persistence.
pub struct ConfigManager {
    path: PathBuf,
    inner: Arc<RwLock<Config>>,
}

impl ConfigManager {
    /// Load config from given base path (parent directory), or from default directory if None.
    /// If file does not exist, a default config is created and written.
    pub fn load(basepath: Option<PathBuf>) -> Result<Self> {
        let config_dir = basepath.unwrap_or_else(default_config_dir);
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let s = fs::read_to_string(&config_path)
                .with_context(|| format!("reading config file: {}", config_path.display()))?;
            let mut cfg: Config = toml::from_str(&s).context("parsing TOML config")?;
            if cfg.normalize() {
                log::info!("Removed the selected input from the output set");
            }
            cfg.validate()?;
            Ok(Self {
                path: config_path,
                inner: Arc::new(RwLock::new(cfg)),
            })
        } else {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("creating config dir: {}", config_dir.display()))?;

            let cfg = Config::default();
            let toml_str = toml::to_string_pretty(&cfg).context("serializing default config")?;
            let mut f = fs::File::create(&config_path)
                .with_context(|| format!("creating config file: {}", config_path.display()))?;
            f.write_all(toml_str.as_bytes())?;
            Ok(Self {
                path: config_path,
                inner: Arc::new(RwLock::new(cfg)),
            })
        }
    }

    /// Save current config to disk atomically.
    pub fn save(&self) -> Result<()> {
        let cfg = self.inner.read().clone();
        cfg.validate()?;
        let tmp = self.path.with_extension("toml.tmp");
        let s = toml::to_string_pretty(&cfg).context("serializing config")?;
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("creating tmp config file: {}", tmp.display()))?;
        f.write_all(s.as_bytes())?;
        f.sync_all()?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "renaming tmp config {} -> {}",
                tmp.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }

    /// Returns a cloneable handle to the inner Arc<RwLock<Config>> to allow reads/writes.
    pub fn handle(&self) -> Arc<RwLock<Config>> {
        self.inner.clone()
    }

    /// Clone of the current configuration.
    pub fn snapshot(&self) -> Config {
        self.inner.read().clone()
    }

    /// Atomically update config using closure and persist to disk.
    ///
    /// The closure's return value is handed back so callers can act on what the
    /// edit changed (see [`crate::selection`]).
    pub fn update<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Config) -> R,
    {
        let out = {
            let mut cfg = self.inner.write();
            f(&mut cfg)
        };
        self.save()?;
        Ok(out)
    }

    /// Access path used for persistence (useful for tests)
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Directory holding the config file: `AUDIO_MIRROR_CONFIG_DIR` if set,
/// otherwise the directory of the executable.
pub fn default_config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe_path| exe_path.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| Path::new(".").to_path_buf())
}
