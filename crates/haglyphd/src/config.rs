//! Configuration file parsing and structures.
//!
//! haglyphd uses TOML for declarative configuration: one `[hub]` section for
//! the Home Assistant connection, display and API settings, and a list of
//! `[[watch]]` rules mapping entities to glyph frames. Configuration is loaded
//! once at startup; there is no hot reload.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tracing_subscriber::filter::LevelFilter;

/// Top-level configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub hub: HubConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub api: Option<ApiConfig>,

    /// Watched entities and their frame-generation rules
    #[serde(default, rename = "watch")]
    pub watch: Vec<WatchRuleConfig>,
}

#[derive(
    Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,
}

/// Home Assistant hub connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Base URL of the hub, e.g. "http://homeassistant.local:8123"
    pub url: String,

    /// Long-lived access token
    pub access_token: String,
}

/// Display pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// Push a frame even when it is identical to the last one pushed.
    /// Useful to refresh pulsing animations; off by default.
    #[serde(default)]
    pub render_on_duplicate: bool,

    /// How contributions from multiple watched entities are combined
    #[serde(default)]
    pub composition: CompositionPolicy,

    /// Lower bound on the time between frame pushes, in milliseconds.
    /// The effective interval is the larger of this and the device minimum.
    #[serde(default)]
    pub min_frame_interval_ms: Option<u64>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            render_on_duplicate: false,
            composition: CompositionPolicy::default(),
            min_frame_interval_ms: None,
        }
    }
}

/// Composition policy when more than one watched entity affects the display
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CompositionPolicy {
    /// The highest-priority non-blank contribution wins
    #[default]
    Priority,

    /// Per-cell maximum across all contributions
    Overlay,
}

/// Status HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_api_bind")]
    pub bind: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_api_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8665
}

/// Frame-generation rule kind for a watched entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Sprite for "on", sprite for "off", error sprite when unavailable
    OnOff,

    /// Numeric state rendered as a bottom-up bar between `min` and `max`
    Level,
}

/// One `[[watch]]` entry: an entity identifier (or trailing-`*` pattern)
/// mapped to a frame-generation rule.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchRuleConfig {
    /// Entity id, e.g. "switch.lamp", or a prefix pattern like "sensor.*"
    pub entity: String,

    #[serde(default = "default_rule_kind")]
    pub kind: RuleKind,

    /// Higher priority wins under the `priority` composition policy.
    /// Ties keep configuration order.
    #[serde(default)]
    pub priority: i32,

    /// Sprite file paths; built-in defaults are used when omitted
    #[serde(default)]
    pub on_sprite: Option<PathBuf>,

    #[serde(default)]
    pub off_sprite: Option<PathBuf>,

    #[serde(default)]
    pub error_sprite: Option<PathBuf>,

    /// Animation tag stamped on frames produced by this rule
    #[serde(default)]
    pub animation: crate::render::Animation,

    /// Animation duration hint, in milliseconds
    #[serde(default)]
    pub duration_ms: Option<u64>,

    /// Value range for `level` rules
    #[serde(default)]
    pub min: Option<f64>,

    #[serde(default)]
    pub max: Option<f64>,
}

fn default_rule_kind() -> RuleKind {
    RuleKind::OnOff
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let config: Config = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation that does not require the display capability.
    /// Sprite dimensions are checked later, once the device reports its grid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.url.is_empty() {
            return Err(ConfigError::Invalid("hub.url must not be empty".into()));
        }
        if self.hub.access_token.is_empty() {
            return Err(ConfigError::Invalid(
                "hub.access_token must not be empty".into(),
            ));
        }
        for rule in &self.watch {
            if rule.entity.is_empty() {
                return Err(ConfigError::Invalid("watch.entity must not be empty".into()));
            }
            if rule.kind == RuleKind::Level {
                let min = rule.min.unwrap_or(0.0);
                let max = rule.max.unwrap_or(100.0);
                if min >= max {
                    return Err(ConfigError::Invalid(format!(
                        "watch rule for {}: min ({}) must be below max ({})",
                        rule.entity, min, max
                    )));
                }
            }
        }
        Ok(())
    }

    /// Patterns for all watched entities, in configuration order
    pub fn watch_patterns(&self) -> Vec<Pattern> {
        self.watch.iter().map(|r| Pattern::parse(&r.entity)).collect()
    }
}

/// An entity identifier match: exact, or prefix when the configured string
/// ends with `*` (e.g. "sensor.*").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Exact(String),
    Prefix(String),
}

impl Pattern {
    pub fn parse(s: &str) -> Self {
        match s.strip_suffix('*') {
            Some(prefix) => Pattern::Prefix(prefix.to_string()),
            None => Pattern::Exact(s.to_string()),
        }
    }

    pub fn matches(&self, entity_id: &str) -> bool {
        match self {
            Pattern::Exact(id) => entity_id == id,
            Pattern::Prefix(prefix) => entity_id.starts_with(prefix.as_str()),
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Exact(id) => write!(f, "{}", id),
            Pattern::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load sprite {path}: {reason}")]
    Sprite { path: PathBuf, reason: String },
}
