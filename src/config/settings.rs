//! Client Settings Storage
//!
//! Tuning for sessions, supervision, plays and the terminal surface, kept as
//! JSON in the config directory.
//! Config location: ~/.sushi on macOS/Linux, %APPDATA%\Sushi on Windows

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::play::PlayOptions;
use crate::session::SupervisorConfig;
use crate::ssh::TransportSettings;
use crate::terminal::TerminalLimits;

pub const SETTINGS_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// Get the Sushi configuration directory
pub fn config_dir() -> Result<PathBuf, SettingsError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("Sushi"));
        }
        dirs::home_dir()
            .map(|home| home.join(".sushi"))
            .ok_or(SettingsError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".sushi"))
            .ok_or(SettingsError::NoConfigDir)
    }
}

pub fn settings_file() -> Result<PathBuf, SettingsError> {
    Ok(config_dir()?.join("settings.json"))
}

/// Persisted client settings; missing fields take their defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub version: u32,
    /// Handshake + auth deadline per hop (ms)
    pub connect_timeout_ms: u64,
    pub keepalive_interval_secs: u64,
    pub keepalive_max: usize,
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    pub monitor_interval_ms: u64,
    pub retry_delay_ms: u64,
    pub input_dedup_ms: u64,
    pub play_timeout_secs: u64,
    pub play_disconnect_counts_as_success: bool,
    pub terminal: TerminalLimits,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            connect_timeout_ms: 10_000,
            keepalive_interval_secs: 15,
            keepalive_max: 3,
            term: "xterm".to_string(),
            cols: 80,
            rows: 24,
            monitor_interval_ms: 1500,
            retry_delay_ms: 1200,
            input_dedup_ms: 150,
            play_timeout_secs: 30,
            play_disconnect_counts_as_success: true,
            terminal: TerminalLimits::default(),
        }
    }
}

impl ClientSettings {
    /// Load from `path`; a missing file yields defaults
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        SettingsStorage::with_path(path.into()).load().await
    }

    pub async fn load_or_default(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        SettingsStorage::with_path(path.into())
            .load_or_default()
            .await
    }

    pub fn transport(&self) -> TransportSettings {
        TransportSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            keepalive_max: self.keepalive_max,
            term: self.term.clone(),
            cols: self.cols,
            rows: self.rows,
        }
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            monitor_interval: Duration::from_millis(self.monitor_interval_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            dedup_window: Duration::from_millis(self.input_dedup_ms),
        }
    }

    pub fn play_options(&self) -> PlayOptions {
        PlayOptions {
            timeout: Duration::from_secs(self.play_timeout_secs),
            disconnect_counts_as_success: self.play_disconnect_counts_as_success,
        }
    }
}

/// Settings file manager
pub struct SettingsStorage {
    path: PathBuf,
}

impl SettingsStorage {
    /// Storage at the default location
    pub fn new() -> Result<Self, SettingsError> {
        Ok(Self {
            path: settings_file()?,
        })
    }

    /// Storage at a custom path (for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load settings; a missing file yields defaults
    pub async fn load(&self) -> Result<ClientSettings, SettingsError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let settings: ClientSettings = serde_json::from_str(&contents)?;
                if settings.version > SETTINGS_VERSION {
                    return Err(SettingsError::VersionTooNew {
                        found: settings.version,
                        supported: SETTINGS_VERSION,
                    });
                }
                Ok(settings)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientSettings::default()),
            Err(e) => Err(SettingsError::Io(e)),
        }
    }

    /// Load settings, falling back to defaults on a corrupted file.
    ///
    /// The unreadable file is backed up first. A newer version is still an
    /// error so it is never overwritten.
    pub async fn load_or_default(&self) -> Result<ClientSettings, SettingsError> {
        match self.load().await {
            Err(SettingsError::Json(e)) => {
                tracing::warn!("Settings file corrupted: {}", e);
                match self.backup().await {
                    Ok(backup_path) => tracing::warn!(
                        "Corrupted settings backed up to {:?}, using defaults",
                        backup_path
                    ),
                    Err(backup_err) => {
                        tracing::error!("Failed to backup corrupted settings: {}", backup_err)
                    }
                }
                Ok(ClientSettings::default())
            }
            other => other,
        }
    }

    /// Write settings atomically (temp file then rename)
    pub async fn save(&self, settings: &ClientSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(settings)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    pub async fn backup(&self) -> Result<PathBuf, SettingsError> {
        let backup_path = self.path.with_extension(format!(
            "json.backup.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));

        if fs::metadata(&self.path).await.is_ok() {
            fs::copy(&self.path, &backup_path).await?;
        }

        Ok(backup_path)
    }
}
