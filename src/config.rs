use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub url: String,
    pub workspace_id: Option<String>,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
    /// Consecutive failed connection attempts before giving up. `None` retries forever.
    pub max_retries: Option<u32>,
    /// A connection counts as established once it delivers a frame or stays up this long.
    /// Drops before that count as failed attempts.
    pub stable_after_ms: u64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws/console".into(),
            workspace_id: None,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            backoff_multiplier: 2.0,
            max_retries: None,
            stable_after_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub capacity: usize,
    /// Distance from the bottom that still counts as "at bottom".
    pub scroll_tolerance: f64,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            capacity: 5_000,
            scroll_tolerance: 4.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub capacity: usize,
    pub history_len: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            capacity: 500,
            history_len: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    /// z-order value past which the stack is compacted back to 0..n-1.
    pub z_ceiling: u64,
    pub viewport_width: i32,
    pub viewport_height: i32,
    pub header_height: i32,
    pub resize_handle: i32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            z_ceiling: 1_000_000,
            viewport_width: 1920,
            viewport_height: 1080,
            header_height: 28,
            resize_handle: 12,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub channel: ChannelSettings,
    pub logs: LogSettings,
    pub tasks: TaskSettings,
    pub windows: WindowSettings,
    #[serde(skip)]
    pub debug: bool,
}

impl ConsoleConfig {
    /// Apply `OPS_CONSOLE_*` environment overrides on top of file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("OPS_CONSOLE_URL") {
            self.channel.url = url;
        }

        if let Ok(raw) = std::env::var("OPS_CONSOLE_LOG_CAPACITY") {
            match raw.parse::<usize>() {
                Ok(capacity) if capacity > 0 => self.logs.capacity = capacity,
                _ => warn!("ignoring invalid OPS_CONSOLE_LOG_CAPACITY={raw}"),
            }
        }

        self.debug = std::env::var("OPS_CONSOLE_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        self
    }
}

pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<ConsoleConfig>,
}

impl ConfigStore {
    pub fn load(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read console config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Invalid console config at {}: {err}; using defaults", path.display());
                ConsoleConfig::default()
            })
        } else {
            ConsoleConfig::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data.with_env_overrides()),
        })
    }

    pub fn get(&self) -> ConsoleConfig {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, config: ConsoleConfig) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = config;
        self.persist(&guard)
    }

    pub fn save(&self) -> Result<()> {
        self.persist(&self.get())
    }

    fn persist(&self, data: &ConsoleConfig) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write console config to {}", self.path.display()))
    }
}
