use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tauri::{AppHandle, Manager};

use crate::AppRuntime;

const CONFIG_FILE_NAME: &str = "config.json";

pub const DEFAULT_URL: &str = "https://home.i.smith.bz/";
pub const DEFAULT_WIDTH: u32 = 375;
pub const DEFAULT_HEIGHT: u32 = 667;
pub const FALLBACK_URL: &str = "https://example.com";
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/604.1";
pub const FAVICON_PROXY: &str = "https://www.google.com/s2/favicons?domain={host}&sz=32";

/// Application-wide defaults. Every field may be overridden from
/// `config.json` in the app config directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_url")]
    pub default_url: String,
    #[serde(default = "default_width")]
    pub default_width: u32,
    #[serde(default = "default_height")]
    pub default_height: u32,
    #[serde(default = "default_fallback_url")]
    pub fallback_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Last favicon candidate; `{host}` is replaced by the site's host.
    #[serde(default = "default_favicon_proxy")]
    pub favicon_proxy: String,
    #[serde(default = "default_initial_icon_delay_ms")]
    pub initial_icon_delay_ms: u64,
    #[serde(default = "default_load_icon_delay_ms")]
    pub load_icon_delay_ms: u64,
    #[serde(default = "default_settings_icon_delay_ms")]
    pub settings_icon_delay_ms: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

fn default_fallback_url() -> String {
    FALLBACK_URL.to_string()
}

fn default_user_agent() -> String {
    MOBILE_USER_AGENT.to_string()
}

fn default_favicon_proxy() -> String {
    FAVICON_PROXY.to_string()
}

fn default_initial_icon_delay_ms() -> u64 {
    3000
}

fn default_load_icon_delay_ms() -> u64 {
    1000
}

fn default_settings_icon_delay_ms() -> u64 {
    2000
}

fn default_probe_timeout_secs() -> u64 {
    15
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_url: default_url(),
            default_width: default_width(),
            default_height: default_height(),
            fallback_url: default_fallback_url(),
            user_agent: default_user_agent(),
            favicon_proxy: default_favicon_proxy(),
            initial_icon_delay_ms: default_initial_icon_delay_ms(),
            load_icon_delay_ms: default_load_icon_delay_ms(),
            settings_icon_delay_ms: default_settings_icon_delay_ms(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Reads `config.json`, falling back to defaults when the file is absent
    /// or malformed.
    pub fn load_or_default(app: &AppHandle<AppRuntime>) -> Self {
        let path = match config_path(app) {
            Ok(path) => path,
            Err(err) => {
                log::warn!("Config directory unavailable, using defaults: {err:#}");
                return Self::default();
            }
        };
        match Self::load_from(&path) {
            Ok(config) => config.sanitized(),
            Err(err) => {
                log::warn!("Ignoring config at {}: {err:#}", path.display());
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        let parsed: Self =
            serde_json::from_str(&contents).with_context(|| "Malformed config JSON")?;
        Ok(parsed)
    }

    /// Zero sizes would break the record invariant, so they revert to the
    /// built-in defaults.
    fn sanitized(mut self) -> Self {
        if self.default_width == 0 {
            self.default_width = DEFAULT_WIDTH;
        }
        if self.default_height == 0 {
            self.default_height = DEFAULT_HEIGHT;
        }
        self
    }

    pub fn initial_icon_delay(&self) -> Duration {
        Duration::from_millis(self.initial_icon_delay_ms)
    }

    pub fn load_icon_delay(&self) -> Duration {
        Duration::from_millis(self.load_icon_delay_ms)
    }

    pub fn settings_icon_delay(&self) -> Duration {
        Duration::from_millis(self.settings_icon_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

pub fn config_dir(app: &AppHandle<AppRuntime>) -> Result<PathBuf> {
    let resolver = app.path();
    resolver
        .app_config_dir()
        .or_else(|_| resolver.app_data_dir())
        .context("Unable to resolve config directory")
}

fn config_path(app: &AppHandle<AppRuntime>) -> Result<PathBuf> {
    Ok(config_dir(app)?.join(CONFIG_FILE_NAME))
}
