use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::sys::message::{VK_F5, VK_F12};

pub fn config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("blink").join("config.toml"))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub runtime: RuntimeSettings,
    pub window: WindowSettings,
    pub keys: KeyBindings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeSettings {
    /// Maximum number of queued commands before submitters block.
    /// `0` selects an unbounded queue.
    pub queue_capacity: usize,
    /// Enables the devtools shortcut.
    pub debug: bool,
    /// Working directory handed to the engine (cookies, staged icons).
    pub temp_dir: Option<PathBuf>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            debug: false,
            temp_dir: None,
        }
    }
}

impl RuntimeSettings {
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(|| std::env::temp_dir().join("blink"))
    }

    pub fn cookie_file(&self) -> PathBuf { self.temp_dir().join("cookie.dat") }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowSettings {
    pub width: i32,
    pub height: i32,
    pub x: i32,
    pub y: i32,
    pub transparent: bool,
    pub hide_on_close: bool,
    pub accept_files: bool,
    pub auto_title: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            x: 200,
            y: 200,
            transparent: false,
            hide_on_close: false,
            accept_files: true,
            auto_title: true,
        }
    }
}

/// Virtual-key codes handled by the pump before the page sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeyBindings {
    pub reload: usize,
    pub devtools: usize,
}

impl Default for KeyBindings {
    fn default() -> Self { Self { reload: VK_F5, devtools: VK_F12 } }
}

impl Config {
    pub fn parse(contents: &str) -> anyhow::Result<Config> {
        toml::from_str(contents).context("invalid configuration")
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn read(path: &Path) -> anyhow::Result<Config> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents)
                .with_context(|| format!("while reading {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(e).with_context(|| format!("could not open {}", path.display())),
        }
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string(self).context("could not serialize configuration")
    }
}
