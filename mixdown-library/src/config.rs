//! Simple configuration persistence for mixdown
//!
//! Stores engine options and the last file played.

use mixdown_audio::EngineOptions;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Application configuration
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Config {
    /// Options for the master bus
    pub engine: EngineOptions,
    /// Last file that was played
    pub last_file: Option<PathBuf>,
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns default config if file doesn't exist or can't be parsed.
    pub fn load() -> Self {
        let path = Self::config_path();
        Self::load_from(&path).unwrap_or_default()
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to the default location
    pub fn save(&self) -> io::Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = self.serialize();
        fs::write(path, content)
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mixdown")
            .join("config.txt")
    }

    /// Parse config from simple key=value format
    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            let engine = &mut config.engine;

            match key {
                "sample_rate" => set(&mut engine.sample_rate, key, value),
                "max_channels" => set(&mut engine.max_channels, key, value),
                "show_info" => set(&mut engine.debugger.show_info, key, value),
                "show_warnings" => set(&mut engine.debugger.show_warnings, key, value),
                "show_errors" => set(&mut engine.debugger.show_errors, key, value),
                "break_on_error" => set(&mut engine.debugger.break_on_error, key, value),
                "last_file" => {
                    if !value.is_empty() {
                        config.last_file = Some(PathBuf::from(value));
                    }
                }
                _ => {} // Ignore unknown keys
            }
        }

        if config.engine.sample_rate == 0 {
            config.engine.sample_rate = EngineOptions::default().sample_rate;
        }
        config
    }

    /// Serialize config to simple key=value format
    fn serialize(&self) -> String {
        let engine = &self.engine;
        let mut lines = vec![
            "# mixdown configuration".to_string(),
            format!("sample_rate={}", engine.sample_rate),
            format!("max_channels={}", engine.max_channels),
            format!("show_info={}", engine.debugger.show_info),
            format!("show_warnings={}", engine.debugger.show_warnings),
            format!("show_errors={}", engine.debugger.show_errors),
            format!("break_on_error={}", engine.debugger.break_on_error),
        ];

        if let Some(ref file) = self.last_file {
            lines.push(format!("last_file={}", file.display()));
        }

        lines.join("\n")
    }
}

/// Parse `value` into `slot`, keeping the old value on failure
fn set<T: FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(key, value, "ignoring invalid config value"),
    }
}
