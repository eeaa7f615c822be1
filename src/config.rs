use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_emulator() -> String {
    "mgba".to_string()
}

fn default_display() -> u32 {
    99
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub hs_address: String,
    pub token: String,
    pub local_room_alias: String,
    pub hs_name: String,
    pub local_user_id: String,
    #[serde(default)]
    pub debug: bool,
    pub bios_location: PathBuf,
    pub rom_location: PathBuf,

    #[serde(default = "default_emulator")]
    pub emulator: String,
    /// Execution speed relative to normal.
    #[serde(default)]
    pub speed: Option<f32>,
    /// X display number of the virtual screen.
    #[serde(default = "default_display")]
    pub display: u32,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        Config::from_json(&text).with_context(|| format!("Failed to parse config: {:?}", path))
    }

    pub fn from_json(text: &str) -> Result<Config> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn room_alias(&self) -> String {
        format!("#{}:{}", self.local_room_alias, self.hs_name)
    }

    pub fn user_id(&self) -> String {
        format!("@{}:{}", self.local_user_id, self.hs_name)
    }

    /// Where logs and dumps go. Falls back to `<data dir>/rust-mpp`.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let mut dir = dirs::data_dir().context("Failed to find the application data directory")?;
        dir.push("rust-mpp");
        Ok(dir)
    }
}
