//! Configuration loading and data folder resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Resolved service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory holding the database and uploaded files
    pub data_folder: PathBuf,
    /// TCP port for the HTTP surface
    pub port: u16,
    /// Rows processed per staging chunk
    pub chunk_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_folder: default_data_folder(),
            port: 5810,
            chunk_size: 500,
        }
    }
}

impl ServiceConfig {
    /// Path of the SQLite database inside the data folder
    pub fn database_path(&self) -> PathBuf {
        self.data_folder.join("radvol.db")
    }
}

/// Data folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_config(cli_data_folder: Option<&str>) -> Result<ServiceConfig> {
    let mut config = ServiceConfig::default();

    // Priority 3: TOML config file (lower priorities overwrite below)
    if let Ok(config_path) = find_config_file() {
        let toml_content = std::fs::read_to_string(&config_path)?;
        let parsed: toml::Value = toml::from_str(&toml_content)
            .map_err(|e| Error::Config(format!("Invalid config file {:?}: {}", config_path, e)))?;

        if let Some(folder) = parsed.get("data_folder").and_then(|v| v.as_str()) {
            config.data_folder = PathBuf::from(folder);
        }
        if let Some(port) = parsed.get("port").and_then(|v| v.as_integer()) {
            config.port = port as u16;
        }
        if let Some(chunk) = parsed.get("chunk_size").and_then(|v| v.as_integer()) {
            if chunk > 0 {
                config.chunk_size = chunk as usize;
            }
        }
    }

    // Priority 2: Environment variable
    if let Ok(folder) = std::env::var("RADVOL_DATA_FOLDER") {
        config.data_folder = PathBuf::from(folder);
    }
    if let Ok(port) = std::env::var("RADVOL_PORT") {
        config.port = port
            .parse()
            .map_err(|_| Error::Config(format!("Invalid RADVOL_PORT: {}", port)))?;
    }

    // Priority 1: Command-line argument
    if let Some(folder) = cli_data_folder {
        config.data_folder = PathBuf::from(folder);
    }

    Ok(config)
}

/// Create the data folder if missing
pub fn ensure_data_folder(config: &ServiceConfig) -> Result<()> {
    std::fs::create_dir_all(&config.data_folder)?;
    Ok(())
}

/// Get configuration file path for the platform
fn find_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/radvol/config.toml first, then /etc/radvol/config.toml
        if let Some(path) = dirs::config_dir().map(|d| d.join("radvol").join("config.toml")) {
            if path.exists() {
                return Ok(path);
            }
        }
        let system_config = PathBuf::from("/etc/radvol/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
        Err(Error::Config("No config file found".to_string()))
    } else {
        let path = dirs::config_dir()
            .map(|d| d.join("radvol").join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        if path.exists() {
            Ok(path)
        } else {
            Err(Error::Config(format!("Config file not found: {:?}", path)))
        }
    }
}

/// Get OS-dependent default data folder path
fn default_data_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("radvol"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/radvol"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("radvol"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/radvol"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("radvol"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\radvol"))
    } else {
        PathBuf::from("./radvol_data")
    }
}
