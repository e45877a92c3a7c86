use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{Engine, ExecutionLimits};

const CONFIG_FILE: &str = "config.toml";

/// Manages config directory and config file operations
#[derive(Clone)]
pub struct ConfigManager {
    pub(crate) config_dir: PathBuf,
}

impl ConfigManager {
    /// Create a ConfigManager with a custom config directory (primarily for testing)
    pub fn with_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    pub fn new(app_name: &str) -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| eyre!("Could not determine config directory"))?
            .join(app_name);

        Ok(Self { config_dir })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self, path: &str) -> PathBuf {
        self.config_dir.join(path)
    }

    pub fn ensure_config_dir(&self) -> Result<()> {
        if !self.config_dir.exists() {
            std::fs::create_dir_all(&self.config_dir)?;
        }
        Ok(())
    }

    /// Default configuration as TOML with every field commented out, so the
    /// file documents the defaults without overriding them.
    pub fn generate_default_config(&self) -> Result<String> {
        let toml_str = toml::to_string_pretty(&AppConfig::default())
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        Ok(Self::comment_all_fields(&toml_str, &Self::collect_all_comments()))
    }

    fn collect_all_comments() -> HashMap<String, &'static str> {
        let mut comments = HashMap::new();
        for (field, comment) in APP_COMMENTS {
            comments.insert(field.to_string(), *comment);
        }
        let sections = [
            ("engine", ENGINE_COMMENTS),
            ("history", HISTORY_COMMENTS),
            ("logging", LOGGING_COMMENTS),
        ];
        for (section, fields) in sections {
            for (field, comment) in fields {
                comments.insert(format!("{}.{}", section, field), *comment);
            }
        }
        comments
    }

    fn comment_all_fields(toml: &str, comments: &HashMap<String, &'static str>) -> String {
        let mut result = String::new();
        result.push_str("# wrangle configuration file\n");
        result.push_str("# This file uses TOML format. See https://toml.io/ for syntax reference.\n");
        result.push('\n');

        let mut current_section = String::new();
        for line in toml.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                current_section = trimmed[1..trimmed.len() - 1].to_string();
                if let Some((_, header)) = SECTION_HEADERS.iter().find(|(s, _)| *s == current_section) {
                    result.push_str(header);
                    result.push('\n');
                }
            } else if let Some(eq) = trimmed.find('=') {
                let field = trimmed[..eq].trim();
                let path = if current_section.is_empty() {
                    field.to_string()
                } else {
                    format!("{}.{}", current_section, field)
                };
                if let Some(comment) = comments.get(&path) {
                    for comment_line in comment.lines() {
                        result.push_str("# ");
                        result.push_str(comment_line);
                        result.push('\n');
                    }
                }
            }
            if trimmed.is_empty() {
                result.push('\n');
            } else {
                result.push_str("# ");
                result.push_str(line);
                result.push('\n');
            }
        }
        result
    }

    /// Write default configuration to config file
    pub fn write_default_config(&self, force: bool) -> Result<PathBuf> {
        let config_path = self.config_path(CONFIG_FILE);

        if config_path.exists() && !force {
            return Err(eyre!(
                "Config file already exists at {}. Use --force to overwrite.",
                config_path.display()
            ));
        }

        self.ensure_config_dir()?;
        std::fs::write(&config_path, self.generate_default_config()?)?;

        Ok(config_path)
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configuration format version (for future compatibility)
    pub version: String,
    pub engine: EngineConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

const APP_COMMENTS: &[(&str, &str)] = &[(
    "version",
    "Configuration format version (for future compatibility)",
)];

const SECTION_HEADERS: &[(&str, &str)] = &[
    (
        "engine",
        "# ============================================================================\n# Execution engines\n# ============================================================================",
    ),
    (
        "history",
        "# ============================================================================\n# Transformation history\n# ============================================================================",
    ),
    (
        "logging",
        "# ============================================================================\n# Logging\n# ============================================================================\n# RUST_LOG, when set, takes precedence over the level below.",
    ),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_engine: Engine,
    pub preview_rows: usize,
    pub timeout_ms: u64,
    /// 0 means no cap on `load_full`.
    pub full_load_max_rows: usize,
    pub polars_streaming: bool,
}

const ENGINE_COMMENTS: &[(&str, &str)] = &[
    (
        "default_engine",
        "Engine used when a request does not name one: \"eager\", \"lazy\" or \"relational\"",
    ),
    ("preview_rows", "Maximum rows returned in a result preview"),
    (
        "timeout_ms",
        "Hard execution timeout in milliseconds. Longer runs fail with a timeout error.",
    ),
    (
        "full_load_max_rows",
        "Maximum rows returned when loading a full dataset (0 = unlimited)",
    ),
    (
        "polars_streaming",
        "Use the Polars streaming engine when collecting lazy and SQL plans",
    ),
];

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_engine: Engine::Lazy,
            preview_rows: 50,
            timeout_ms: 30_000,
            full_load_max_rows: 1_000_000,
            polars_streaming: false,
        }
    }
}

impl EngineConfig {
    pub fn merge(&mut self, other: Self) {
        let default = EngineConfig::default();
        if other.default_engine != default.default_engine {
            self.default_engine = other.default_engine;
        }
        if other.preview_rows != default.preview_rows {
            self.preview_rows = other.preview_rows;
        }
        if other.timeout_ms != default.timeout_ms {
            self.timeout_ms = other.timeout_ms;
        }
        if other.full_load_max_rows != default.full_load_max_rows {
            self.full_load_max_rows = other.full_load_max_rows;
        }
        if other.polars_streaming != default.polars_streaming {
            self.polars_streaming = other.polars_streaming;
        }
    }

    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            timeout: Duration::from_millis(self.timeout_ms),
            preview_rows: self.preview_rows,
            polars_streaming: self.polars_streaming,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// 0 means unbounded.
    pub max_entries: usize,
}

const HISTORY_COMMENTS: &[(&str, &str)] = &[(
    "max_entries",
    "Maximum operations kept per dataset before applying more is refused (0 = unlimited)",
)];

impl HistoryConfig {
    pub fn merge(&mut self, other: Self) {
        if other.max_entries != 0 {
            self.max_entries = other.max_entries;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

const LOGGING_COMMENTS: &[(&str, &str)] = &[
    (
        "level",
        "Log filter, e.g. \"warn\", \"info\" or \"wrangle_lib=debug\"",
    ),
    ("format", "\"compact\" (one line per event) or \"full\""),
];

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl LoggingConfig {
    pub fn merge(&mut self, other: Self) {
        let default = LoggingConfig::default();
        if other.level != default.level {
            self.level = other.level;
        }
        if other.format != default.format {
            self.format = other.format;
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "0.1".to_string(),
            engine: EngineConfig::default(),
            history: HistoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// Configuration loading and merging
impl AppConfig {
    /// Load configuration from all layers (default → user)
    pub fn load(app_name: &str) -> Result<Self> {
        Self::load_from(&ConfigManager::new(app_name)?)
    }

    pub fn load_from(manager: &ConfigManager) -> Result<Self> {
        let config_path = manager.config_path(CONFIG_FILE);
        let mut config = AppConfig::default();
        config.merge(Self::load_user_config(&config_path)?);
        config
            .validate()
            .map_err(|e| eyre!("Invalid configuration in {}: {}", config_path.display(), e))?;
        Ok(config)
    }

    fn load_user_config(config_path: &Path) -> Result<AppConfig> {
        if !config_path.exists() {
            return Ok(AppConfig::default());
        }

        let content = std::fs::read_to_string(config_path).map_err(|e| {
            eyre!(
                "Failed to read config file at {}: {}",
                config_path.display(),
                e
            )
        })?;

        toml::from_str(&content).map_err(|e| {
            eyre!(
                "Failed to parse config file at {}: {}",
                config_path.display(),
                e
            )
        })
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: AppConfig) {
        if other.version != AppConfig::default().version {
            self.version = other.version;
        }
        self.engine.merge(other.engine);
        self.history.merge(other.history);
        self.logging.merge(other.logging);
    }

    pub fn validate(&self) -> Result<()> {
        if !self.version.starts_with("0.1") {
            return Err(eyre!(
                "Unsupported config version: {}. Expected 0.1.x",
                self.version
            ));
        }
        if self.engine.preview_rows == 0 {
            return Err(eyre!("engine.preview_rows must be greater than 0"));
        }
        if self.engine.timeout_ms == 0 {
            return Err(eyre!("engine.timeout_ms must be greater than 0"));
        }
        if self.logging.level.trim().is_empty() {
            return Err(eyre!("logging.level must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_commented_and_parses() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_dir(dir.path().to_path_buf());
        let text = manager.generate_default_config().unwrap();
        assert!(text
            .lines()
            .all(|l| l.is_empty() || l.starts_with('#')));
        assert!(text.contains("# Hard execution timeout"));

        // Uncommenting everything yields the defaults back.
        let uncommented: String = text
            .lines()
            .filter_map(|l| l.strip_prefix("# "))
            .filter(|l| {
                l.starts_with('[')
                    || l.split_once(" = ").is_some_and(|(key, _)| {
                        key.chars().all(|c| c.is_ascii_lowercase() || c == '_')
                    })
            })
            .map(|l| format!("{}\n", l))
            .collect();
        let parsed: AppConfig = toml::from_str(&uncommented).unwrap();
        assert_eq!(parsed, AppConfig::default());
    }

    #[test]
    fn test_write_default_config_respects_force() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_dir(dir.path().join("wrangle"));
        let path = manager.write_default_config(false).unwrap();
        assert!(path.exists());
        assert!(manager.write_default_config(false).is_err());
        assert!(manager.write_default_config(true).is_ok());
    }

    #[test]
    fn test_user_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_dir(dir.path().to_path_buf());
        std::fs::write(
            manager.config_path(CONFIG_FILE),
            "[engine]\ndefault_engine = \"relational\"\npreview_rows = 5\n\n[history]\nmax_entries = 3\n",
        )
        .unwrap();
        let config = AppConfig::load_from(&manager).unwrap();
        assert_eq!(config.engine.default_engine, Engine::Relational);
        assert_eq!(config.engine.limits().preview_rows, 5);
        assert_eq!(config.engine.timeout_ms, 30_000);
        assert_eq!(config.history.max_entries, 3);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_dir(dir.path().to_path_buf());
        std::fs::write(manager.config_path(CONFIG_FILE), "[engine]\ntimeout_ms = 0\n").unwrap();
        assert!(AppConfig::load_from(&manager).is_err());

        std::fs::write(manager.config_path(CONFIG_FILE), "version = \"9.0\"\n").unwrap();
        let err = AppConfig::load_from(&manager).unwrap_err();
        assert!(err.to_string().contains("Unsupported config version"));
    }
}
