use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Canvas tuning knobs. Pixel values are in screen space unless noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    // World units between sibling boxes and between depth bands
    pub node_spacing: f32,
    pub drag_threshold: f32,
    pub animation_ms: u64,
    pub relayout_delay_ms: u64,
    pub snapshot_min_interval_ms: u64,
    pub autopan_boundary: f32,
    pub autopan_max_step: f32,
    pub autopan_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub min_zoom: f32,
    pub max_zoom: f32,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            node_spacing: 40.0,
            drag_threshold: 5.0,
            animation_ms: 250,
            relayout_delay_ms: 50,
            snapshot_min_interval_ms: 200,
            autopan_boundary: 50.0,
            autopan_max_step: 12.0,
            autopan_interval_ms: 16,
            rpc_timeout_ms: 5000,
            min_zoom: 0.2,
            max_zoom: 3.0,
        }
    }
}

impl EditorSettings {
    pub fn animation(&self) -> Duration { Duration::from_millis(self.animation_ms) }
    pub fn relayout_delay(&self) -> Duration { Duration::from_millis(self.relayout_delay_ms) }
    pub fn snapshot_min_interval(&self) -> Duration { Duration::from_millis(self.snapshot_min_interval_ms) }
    pub fn autopan_interval(&self) -> Duration { Duration::from_millis(self.autopan_interval_ms) }
    pub fn rpc_timeout(&self) -> Duration { Duration::from_millis(self.rpc_timeout_ms) }

    // Hand-edited files may carry nonsense; keep the editor usable
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        if !(self.node_spacing >= 0.0) { self.node_spacing = d.node_spacing; }
        if !(self.drag_threshold >= 0.0) { self.drag_threshold = d.drag_threshold; }
        if !(self.min_zoom > 0.0) { self.min_zoom = d.min_zoom; }
        if !(self.max_zoom >= self.min_zoom) {
            log::warn!("max_zoom {} below min_zoom {}, using defaults", self.max_zoom, self.min_zoom);
            self.min_zoom = d.min_zoom;
            self.max_zoom = d.max_zoom;
        }
        if self.autopan_interval_ms == 0 { self.autopan_interval_ms = d.autopan_interval_ms; }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "AppSettings::default_bridge_url")]
    pub bridge_url: String,
    // Runtime instance the editor talks to; services and topics live under it
    #[serde(default = "AppSettings::default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub editor: EditorSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            bridge_url: Self::default_bridge_url(),
            namespace: Self::default_namespace(),
            editor: EditorSettings::default(),
        }
    }
}

impl AppSettings {
    fn config_dir() -> PathBuf {
        // Cross-platform user config dir
        #[cfg(target_os = "macos")]
        {
            // ~/Library/Application Support/Tree-Loom
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join("Library").join("Application Support").join("Tree-Loom");
        }
        #[cfg(target_os = "windows")]
        {
            // %APPDATA%\Tree-Loom
            if let Ok(appdata) = std::env::var("APPDATA") {
                return PathBuf::from(appdata).join("Tree-Loom");
            }
            return PathBuf::from("Tree-Loom");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            // $XDG_CONFIG_HOME/Tree-Loom or ~/.config/Tree-Loom
            if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
                return PathBuf::from(xdg).join("Tree-Loom");
            }
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join(".config").join("Tree-Loom");
        }
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::settings_dir())
    }

    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join("settings.json");
        if !path.exists() {
            log::debug!("no settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let mut f = fs::File::open(&path)?;
        let mut s = String::new();
        f.read_to_string(&mut s)?;
        Self::from_json(&s)
    }

    /// Like [`AppSettings::load`], but a broken file falls back to defaults.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            log::warn!("failed to read settings, using defaults: {:#}", e);
            Self::default()
        })
    }

    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let mut v: Self = serde_json::from_str(s)?;
        v.editor = v.editor.sanitized();
        Ok(v)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::settings_dir())
    }

    pub fn save_to(&self, dir: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(dir)?;
        let path = dir.join("settings.json");
        let s = serde_json::to_string_pretty(self)?;
        let mut f = fs::File::create(&path)?;
        f.write_all(s.as_bytes())?;
        log::info!("settings saved to {}", path.display());
        Ok(())
    }

    /// Return the directory where the settings file (settings.json) is stored.
    /// This is OS-specific and resolves to a per-user configuration directory.
    pub fn settings_dir() -> PathBuf {
        Self::config_dir()
    }

    fn default_bridge_url() -> String { "ws://127.0.0.1:9090".to_string() }
    fn default_namespace() -> String { "/tree_node/".to_string() }
}
