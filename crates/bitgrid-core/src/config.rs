//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level bitgrid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid: Option<GridConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub: Option<HubConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Directory served for any path not matched by the API routes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,

    /// Allow cross-origin requests from any origin.
    #[serde(default = "default_true")]
    pub cors: bool,
}

fn default_port() -> u16 {
    6060
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Number of cells in the grid (default: 625, a 25x25 board).
    #[serde(default = "default_grid_size")]
    pub size: usize,

    /// Storage key the bits live under.
    #[serde(default = "default_grid_key")]
    pub key: String,

    #[serde(default)]
    pub encoding: SnapshotEncoding,

    #[serde(default)]
    pub storage: StorageKind,

    /// Root directory for the file store (default: `~/.bitgrid/data`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

fn default_grid_size() -> usize {
    625
}

fn default_grid_key() -> String {
    "grid_bits".into()
}

/// Text encoding of the packed grid snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotEncoding {
    #[default]
    Base64,
    Hex,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Per-session outbound queue capacity (default: 256).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of each hub input channel (default: 1024).
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Minimum interval between accepted toggles per session (default: 250).
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_event_capacity() -> usize {
    1024
}

fn default_throttle_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "bitgrid_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references and
    /// applying `GRID_SIZE` / `GRID_PORT` overrides.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let substituted = substitute_env_vars(&raw);
            json5::from_str(&substituted)
                .map_err(|e| crate::error::GridError::Config(e.to_string()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> crate::error::Result<()> {
        if let Ok(size) = std::env::var("GRID_SIZE") {
            let size = size
                .parse()
                .map_err(|_| crate::error::GridError::Config(format!("invalid GRID_SIZE: {size}")))?;
            self.grid.get_or_insert_with(GridConfig::default).size = size;
        }
        if let Ok(port) = std::env::var("GRID_PORT") {
            let port = port
                .parse()
                .map_err(|_| crate::error::GridError::Config(format!("invalid GRID_PORT: {port}")))?;
            self.gateway.get_or_insert_with(GatewayConfig::default).port = port;
        }
        Ok(())
    }

    /// Default config file location: `~/.bitgrid/config.json`
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(6060)
    }

    pub fn bind_addr(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn cors_enabled(&self) -> bool {
        self.gateway.as_ref().map(|g| g.cors).unwrap_or(true)
    }

    pub fn static_dir(&self) -> Option<PathBuf> {
        self.gateway
            .as_ref()
            .and_then(|g| g.static_dir.as_ref())
            .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
    }

    pub fn grid_size(&self) -> usize {
        self.grid.as_ref().map(|g| g.size).unwrap_or(625)
    }

    pub fn grid_key(&self) -> String {
        self.grid
            .as_ref()
            .map(|g| g.key.clone())
            .unwrap_or_else(default_grid_key)
    }

    pub fn snapshot_encoding(&self) -> SnapshotEncoding {
        self.grid.as_ref().map(|g| g.encoding).unwrap_or_default()
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.grid.as_ref().map(|g| g.storage).unwrap_or_default()
    }

    /// Resolve the file-store directory.
    pub fn grid_data_dir(&self) -> PathBuf {
        self.grid
            .as_ref()
            .and_then(|g| g.data_dir.as_ref())
            .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
            .unwrap_or_else(|| data_dir().join("data"))
    }

    pub fn queue_capacity(&self) -> usize {
        self.hub.as_ref().map(|h| h.queue_capacity).unwrap_or(256)
    }

    pub fn event_capacity(&self) -> usize {
        self.hub.as_ref().map(|h| h.event_capacity).unwrap_or(1024)
    }

    pub fn throttle_interval(&self) -> std::time::Duration {
        let ms = self.hub.as_ref().map(|h| h.throttle_ms).unwrap_or(250);
        std::time::Duration::from_millis(ms)
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.gateway_port() == 0 {
            errors.push("Gateway port cannot be 0".to_string());
        }
        if self.grid_size() == 0 {
            errors.push("Grid size cannot be 0".to_string());
        }
        if self.queue_capacity() == 0 {
            errors.push("Hub queue capacity cannot be 0".to_string());
        }
        if self.event_capacity() == 0 {
            errors.push("Hub event capacity cannot be 0".to_string());
        }
        if self.throttle_interval().is_zero() {
            warnings.push("Throttle interval is 0; toggles are not rate limited".to_string());
        }
        if let Some(dir) = self.static_dir() {
            if !dir.is_dir() {
                warnings.push(format!("Static directory not found: {}", dir.display()));
            }
        }

        (warnings, errors)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            static_dir: None,
            cors: true,
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            size: default_grid_size(),
            key: default_grid_key(),
            encoding: SnapshotEncoding::default(),
            storage: StorageKind::default(),
            data_dir: None,
        }
    }
}

/// Base directory for bitgrid data: `~/.bitgrid/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bitgrid")
}
