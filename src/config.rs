// src/config.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lazy_static::lazy_static;
use log::{error, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SettingsError;

pub const SETTINGS_FILE_NAME: &str = ".smart_dashboard_settings.json";

pub const DEFAULT_REFRESH_MS: u64 = 1000;
pub const MIN_REFRESH_MS: u64 = 100;
pub const MAX_REFRESH_MS: u64 = 10_000;
pub const DEFAULT_ACCENT_COLOUR: &str = "#FF0000";

lazy_static! {
    static ref HEX_COLOUR: Regex =
        Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("hex colour pattern");
}

pub fn clamp_refresh_ms(ms: u64) -> u64 {
    ms.clamp(MIN_REFRESH_MS, MAX_REFRESH_MS)
}

pub fn clamp_refresh_interval(refresh: Duration) -> Duration {
    let ms = u64::try_from(refresh.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(clamp_refresh_ms(ms))
}

pub fn is_hex_colour(value: &str) -> bool {
    HEX_COLOUR.is_match(value)
}

/// Settings as persisted. Keys this crate does not know are carried in
/// `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSettings")]
pub struct Settings {
    /// Milliseconds between data refreshes.
    pub graph_refresh_rate: u64,
    /// `#RRGGBB`
    #[serde(rename = "accent_color")]
    pub accent_colour: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            graph_refresh_rate: DEFAULT_REFRESH_MS,
            accent_colour: DEFAULT_ACCENT_COLOUR.to_string(),
            extra: Map::new(),
        }
    }
}

/// On-disk shape. Both colour spellings may be present at once; the
/// American one wins.
#[derive(Deserialize)]
struct RawSettings {
    graph_refresh_rate: Option<u64>,
    accent_color: Option<String>,
    accent_colour: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RawSettings> for Settings {
    fn from(raw: RawSettings) -> Self {
        Settings {
            graph_refresh_rate: raw.graph_refresh_rate.unwrap_or(DEFAULT_REFRESH_MS),
            accent_colour: raw
                .accent_color
                .or(raw.accent_colour)
                .unwrap_or_else(|| DEFAULT_ACCENT_COLOUR.to_string()),
            extra: raw.extra,
        }
    }
}

impl Settings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(clamp_refresh_ms(self.graph_refresh_rate))
    }

    /// Pulls out-of-domain values back to something usable.
    pub fn sanitized(mut self) -> Self {
        let clamped = clamp_refresh_ms(self.graph_refresh_rate);
        if clamped != self.graph_refresh_rate {
            warn!(
                "graph_refresh_rate {} out of range, using {}",
                self.graph_refresh_rate, clamped
            );
            self.graph_refresh_rate = clamped;
        }
        if !is_hex_colour(&self.accent_colour) {
            warn!(
                "accent colour {:?} is not #RRGGBB, using {}",
                self.accent_colour, DEFAULT_ACCENT_COLOUR
            );
            self.accent_colour = DEFAULT_ACCENT_COLOUR.to_string();
        }
        self
    }
}

/// The per-user JSON settings document.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SettingsStore { path: path.into() }
    }

    /// `~/.smart_dashboard_settings.json`
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        dirs::home_dir()
            .map(|home| home.join(SETTINGS_FILE_NAME))
            .ok_or(SettingsError::NoHomeDir)
    }

    pub fn at_default_path() -> Result<Self, SettingsError> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn try_load(&self) -> Result<Settings, SettingsError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| SettingsError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Never fails: a missing, unreadable or corrupt file is replaced with
    /// the defaults, which are returned.
    pub fn load(&self) -> Settings {
        if !self.path.exists() {
            let defaults = Settings::default();
            self.save(&defaults);
            return defaults;
        }
        match self.try_load() {
            Ok(settings) => settings.sanitized(),
            Err(err) => {
                warn!("resetting settings: {}", err);
                let defaults = Settings::default();
                self.save(&defaults);
                defaults
            }
        }
    }

    pub fn try_save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let data = serde_json::to_vec_pretty(settings)?;
        fs::write(&self.path, data).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Overwrites the document. Failures are logged, not returned; the
    /// caller's in-memory settings stay authoritative.
    pub fn save(&self, settings: &Settings) -> bool {
        match self.try_save(settings) {
            Ok(()) => true,
            Err(err) => {
                error!("Error saving settings: {}", err);
                false
            }
        }
    }
}
