use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::osc::DEFAULT_OSC_HOST;
use crate::params::{ParamId, ParamStore};

const SETTINGS_VERSION: u32 = 1;
pub const DEFAULT_SETTINGS_FILE: &str = "amenchop.json";

/// Persisted tunables, keyed by the external parameter names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub version: u32,
    pub params: BTreeMap<String, f32>,
    pub osc_host: String,
    /// Sample to load on startup
    #[serde(default)]
    pub sample: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            params: BTreeMap::new(),
            osc_host: DEFAULT_OSC_HOST.to_string(),
            sample: None,
        }
    }
}

impl Settings {
    /// Snapshot the store. Transient values are left out.
    pub fn capture(params: &ParamStore, osc_host: &str, sample: Option<String>) -> Self {
        let params = params
            .snapshot()
            .into_iter()
            .filter(|(id, _)| !id.is_transient())
            .map(|(id, value)| (id.key().to_string(), value))
            .collect();
        Self {
            version: SETTINGS_VERSION,
            params,
            osc_host: osc_host.to_string(),
            sample,
        }
    }

    /// Write the stored values into `params`; transient ones go back to defaults
    pub fn apply(&self, params: &ParamStore) {
        params.reset_transient();
        for (key, value) in &self.params {
            match ParamId::from_key(key) {
                Some(id) if !id.is_transient() => {
                    params.set(id, *value);
                }
                Some(_) => {}
                None => log::warn!(target: "config", "Ignoring unknown setting '{}'", key),
            }
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    PathBuf::from(DEFAULT_SETTINGS_FILE)
}

pub fn save_settings(settings: &Settings, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let raw: Value =
        serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))?;

    let version = raw.get("version").and_then(|v| v.as_u64()).unwrap_or(1) as u32;
    if version > SETTINGS_VERSION {
        bail!(
            "Settings version {} is newer than supported version {}",
            version,
            SETTINGS_VERSION
        );
    }
    serde_json::from_value(raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load if the file exists; a missing file is not an error
pub fn load_or_default(path: &Path) -> Result<Settings> {
    if path.exists() {
        load_settings(path)
    } else {
        Ok(Settings::default())
    }
}
