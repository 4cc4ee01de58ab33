//! Server configuration management.
//!
//! Reads/writes TOML at `./chunkline-server.toml`, or at the path named by
//! `CHUNKLINE_CONFIG`. A missing file is created with the defaults.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use chunkline_server::ServerConfig;
use chunkline_store::StoreConfig;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "CHUNKLINE_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "chunkline-server.toml";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 7780;

/// On-disk config format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Directory finished files are published into.
    pub storage_dir: PathBuf,
    /// Directory for in-progress temp files; same filesystem as `storage_dir`.
    pub temp_dir: PathBuf,
    /// Per-file size ceiling in bytes (0 = unlimited).
    pub size_limit: u64,
    /// Whether clients may replace existing files.
    pub overwrite_allowed: bool,
    pub bind: IpAddr,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./uploads"),
            temp_dir: PathBuf::from("./uploads/.partial"),
            size_limit: 0,
            overwrite_allowed: false,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerSettings {
    /// Loads settings from the configured path, writing defaults if absent.
    pub fn load() -> anyhow::Result<(Self, PathBuf)> {
        let path = config_file_path();
        let settings = Self::load_from(&path)?;
        Ok((settings, path))
    }

    /// Loads settings from `path`, writing defaults if the file is missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let settings = Self::default();
            settings.save(path)?;
            tracing::info!(path = %path.display(), "wrote default server configuration");
            return Ok(settings);
        }

        let content = std::fs::read_to_string(path)?;
        let settings = toml::from_str::<ServerSettings>(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        Ok(settings)
    }

    /// Saves settings to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "server configuration saved");
        Ok(())
    }

    /// Validated store configuration.
    pub fn store_config(&self) -> anyhow::Result<StoreConfig> {
        Ok(StoreConfig::new(&self.storage_dir, &self.temp_dir)?
            .with_size_limit(self.size_limit)
            .with_overwrite_allowed(self.overwrite_allowed))
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
        }
    }
}

fn config_file_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
