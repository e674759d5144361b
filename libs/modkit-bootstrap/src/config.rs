use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration with strongly-typed sections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Host process settings.
    #[serde(default)]
    pub host: HostConfig,
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
    /// Module supervisor tuning.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Base directory for relative log paths. Empty means the working directory.
    #[serde(default)]
    pub home_dir: String,
}

/// Logging configuration - maps target prefixes to their logging settings.
/// Key "default" is the catch-all for events that don't match an explicit target.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/modhost.log"; empty disables the file sink
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

/// Tuning knobs for the module supervisor and its stall monitor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Period between two stall monitoring passes.
    #[serde(with = "humantime_serde")]
    pub monitor_interval: Duration,
    /// A module whose rolling average exceeds this value is considered stalled.
    #[serde(with = "humantime_serde")]
    pub stall_threshold: Duration,
    /// Number of most recent lifecycle call durations kept per module.
    pub sample_window: usize,
    /// Module loaded and started before every other module (usually the logger).
    pub bootstrap_module: Option<String>,
    /// When false, stalls are reported but modules are not restarted.
    pub auto_restart: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(5),
            stall_threshold: Duration::from_secs(4),
            sample_window: 3,
            bootstrap_module: None,
            auto_restart: true,
        }
    }
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: "logs/modhost.log".to_string(),
            file_level: "debug".to_string(),
            max_age_days: Some(7),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            logging: Some(default_logging_config()),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        let path = config_path.as_ref();
        if !path.exists() {
            anyhow::bail!("config file '{}' does not exist", path.display());
        }

        // Logging stays None unless YAML/ENV provide it.
        let base = AppConfig {
            logging: None,
            ..AppConfig::default()
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(path))
            // Example: APP__SUPERVISOR__STALL_THRESHOLD=10s maps to supervisor.stall_threshold
            .merge(Env::prefixed("APP__").split("__"));

        let config: AppConfig = figment
            .extract()
            .with_context(|| format!("Failed to extract config from '{}'", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file or fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => Ok(Self::default()),
        }
    }

    /// Reject values the supervisor cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.supervisor.sample_window == 0 {
            anyhow::bail!("supervisor.sample_window must be at least 1");
        }
        if self.supervisor.monitor_interval.is_zero() {
            anyhow::bail!("supervisor.monitor_interval must be greater than zero");
        }
        Ok(())
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Directory that relative log file paths are resolved against.
    pub fn home_dir(&self) -> Result<PathBuf> {
        let raw = self.host.home_dir.trim();
        if raw.is_empty() {
            return std::env::current_dir().context("Failed to read the working directory");
        }
        if let Some(rest) = raw.strip_prefix('~') {
            let home = std::env::var("HOME").context("HOME is not set, cannot expand '~'")?;
            return Ok(Path::new(&home).join(rest.trim_start_matches(['/', '\\'])));
        }
        Ok(PathBuf::from(raw))
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        // Set logging level based on verbose flags for "default" section.
        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            default_section.console_level = match args.verbose {
                0 => default_section.console_level.clone(), // keep
                1 => "debug".to_string(),
                _ => "trace".to_string(),
            };
        }

        if let Some(module) = &args.bootstrap_module {
            self.supervisor.bootstrap_module = Some(module.clone());
        }
    }
}

/// Command line arguments structure.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub print_config: bool,
    pub verbose: u8,
    pub bootstrap_module: Option<String>,
}
