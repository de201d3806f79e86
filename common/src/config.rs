// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/gypsy.json";
pub const DEFAULT_SOCKET_PATH: &str = "/run/gypsy.sock";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Daemon configuration, loaded once at startup.
///
/// Every key is optional. Without `allowed_device_globs` no device can be opened.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GypsyConfig {
    /// Ordered allow-list of glob patterns. The literal `bluetooth` admits any valid Bluetooth address.
    pub allowed_device_globs: Vec<String>,
    /// Terminate the daemon once it has been idle after the last client released its device.
    pub auto_terminate: bool,
    /// Location of the local bus socket.
    pub socket_path: PathBuf,
    /// Prefix of the raw NMEA capture files, capture is off when unset.
    pub nmea_log: Option<PathBuf>,
}

impl Default for GypsyConfig {
    fn default() -> Self {
        GypsyConfig {
            allowed_device_globs: vec![],
            auto_terminate: false,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            nmea_log: None,
        }
    }
}

impl GypsyConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        })?;
        GypsyConfig::from_json(&json)
    }
}
