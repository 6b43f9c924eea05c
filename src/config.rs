//! Configuration management for the Metroid client.
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults (`config/default.toml`, embedded in the binary)
//! 2. `config/default.toml` and `config/local.toml` in the working directory, if present
//! 3. A file given with `--config`
//! 4. Environment variables prefixed with `METROID_`, using `__` between
//!    section and key (e.g. `METROID_WRITER__FLUSH_INTERVAL_MS=250`)
//! 5. Command-line arguments

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use config::{Config, Environment, File, FileFormat};
use metroid_store::storage::table_manager::validate_table_name;
use metroid_store::{ProvisioningOptions, TableSchema};
use serde::Deserialize;

use crate::error::{MetroidError, Result};
use crate::tracker::TrackerOptions;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Engines accepted in `[backend] engine`.
pub const SUPPORTED_ENGINES: &[&str] = &["memory", "duckdb"];

/// Configuration flags shared by every CLI subcommand.
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigArgs {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Storage engine ("memory" or "duckdb")
    #[arg(long, global = true)]
    pub engine: Option<String>,

    /// Engine connection string
    #[arg(long, global = true)]
    pub connection: Option<String>,

    /// Engine options (key=value, can be repeated)
    #[arg(long = "engine-option", value_name = "KEY=VAL", global = true)]
    pub engine_options: Vec<String>,

    /// Table name
    #[arg(long, global = true)]
    pub table: Option<String>,
}

/// Complete client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub table: TableSettings,
    #[serde(default)]
    pub writer: WriterSettings,
    #[serde(default)]
    pub provisioning: ProvisioningSettings,
}

/// Which storage engine to use and how to reach it.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
    /// Engine type ("memory" or "duckdb")
    pub engine: String,
    /// Connection string for the engine
    pub connection: String,
    /// Engine-specific options
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            engine: "memory".to_string(),
            connection: ":memory:".to_string(),
            options: HashMap::new(),
        }
    }
}

/// The table holding tracked records.
#[derive(Debug, Clone, Deserialize)]
pub struct TableSettings {
    pub name: String,
    #[serde(default = "default_capacity")]
    pub read_capacity: u64,
    #[serde(default = "default_capacity")]
    pub write_capacity: u64,
}

fn default_capacity() -> u64 {
    1
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            name: "metroids".to_string(),
            read_capacity: default_capacity(),
            write_capacity: default_capacity(),
        }
    }
}

/// Batch writer cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct WriterSettings {
    pub flush_interval_ms: u64,
    pub max_batch_size: usize,
}

impl Default for WriterSettings {
    fn default() -> Self {
        let options = TrackerOptions::default();
        Self {
            flush_interval_ms: millis(options.flush_interval),
            max_batch_size: options.max_batch_size,
        }
    }
}

/// Polling behaviour while a new table becomes active.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningSettings {
    pub poll_interval_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        let options = ProvisioningOptions::default();
        Self {
            poll_interval_ms: millis(options.poll_interval),
            max_wait_ms: millis(options.max_wait),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Settings {
    /// Loads configuration from all available sources and validates it.
    pub fn new(args: &ConfigArgs) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from(Path::new("config").join("default.toml")).required(false))
            .add_source(File::from(Path::new("config").join("local.toml")).required(false));

        if let Some(ref path) = args.config {
            builder = builder.add_source(File::from(path.clone()));
        }

        builder = builder.add_source(
            Environment::with_prefix("METROID")
                .prefix_separator("_")
                .separator("__"),
        );

        if let Some(ref engine) = args.engine {
            builder = builder.set_override("backend.engine", engine.as_str())?;
        }
        if let Some(ref connection) = args.connection {
            builder = builder.set_override("backend.connection", connection.as_str())?;
        }
        if !args.engine_options.is_empty() {
            builder = builder.set_override("backend.options", parse_key_values(&args.engine_options)?)?;
        }
        if let Some(ref table) = args.table {
            builder = builder.set_override("table.name", table.as_str())?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects values that would leave the client unable to run.
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_ENGINES.contains(&self.backend.engine.as_str()) {
            return Err(invalid(format!(
                "unsupported engine '{}', expected one of {:?}",
                self.backend.engine, SUPPORTED_ENGINES
            )));
        }
        validate_table_name(&self.table.name).map_err(|e| invalid(e.to_string()))?;
        self.tracker_options().validate()?;
        if self.provisioning.poll_interval_ms == 0 {
            return Err(invalid("provisioning.poll_interval_ms must be greater than zero"));
        }
        Ok(())
    }

    pub fn table_schema(&self) -> TableSchema {
        TableSchema::metroid(
            self.table.name.clone(),
            self.table.read_capacity,
            self.table.write_capacity,
        )
    }

    pub fn tracker_options(&self) -> TrackerOptions {
        TrackerOptions {
            flush_interval: Duration::from_millis(self.writer.flush_interval_ms),
            max_batch_size: self.writer.max_batch_size,
        }
    }

    pub fn provisioning_options(&self) -> ProvisioningOptions {
        ProvisioningOptions {
            poll_interval: Duration::from_millis(self.provisioning.poll_interval_ms),
            max_wait: Duration::from_millis(self.provisioning.max_wait_ms),
        }
    }
}

fn invalid(reason: impl Into<String>) -> MetroidError {
    MetroidError::InvalidConfig {
        reason: reason.into(),
    }
}

/// Parses repeated `key=value` flags into a map.
fn parse_key_values(pairs: &[String]) -> Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(invalid(format!("expected KEY=VALUE, got '{}'", pair))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.backend.engine, "memory");
        assert_eq!(settings.table.name, "metroids");
        assert_eq!(settings.writer.flush_interval_ms, 1000);
        assert_eq!(settings.writer.max_batch_size, 25);
        assert_eq!(settings.provisioning.max_wait_ms, 120_000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_embedded_defaults_match_code_defaults() {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let defaults = Settings::default();
        assert_eq!(settings.backend.engine, defaults.backend.engine);
        assert_eq!(settings.table.name, defaults.table.name);
        assert_eq!(settings.tracker_options(), defaults.tracker_options());
        assert_eq!(settings.provisioning_options(), defaults.provisioning_options());
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("METROID_TABLE__NAME", "env_metroids");
        let settings = Settings::new(&ConfigArgs::default()).unwrap();
        std::env::remove_var("METROID_TABLE__NAME");
        assert_eq!(settings.table.name, "env_metroids");
    }

    #[test]
    fn test_file_and_cli_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[writer]\nflush_interval_ms = 250\nmax_batch_size = 10").unwrap();

        let args = ConfigArgs {
            config: Some(file.path().to_path_buf()),
            engine: Some("duckdb".to_string()),
            engine_options: vec!["scan_page_size=50".to_string()],
            ..ConfigArgs::default()
        };
        let settings = Settings::new(&args).unwrap();
        assert_eq!(settings.backend.engine, "duckdb");
        assert_eq!(settings.backend.options.get("scan_page_size"), Some(&"50".to_string()));
        assert_eq!(
            settings.tracker_options(),
            TrackerOptions {
                flush_interval: Duration::from_millis(250),
                max_batch_size: 10,
            }
        );
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut settings = Settings::default();
        settings.writer.max_batch_size = 0;
        assert!(matches!(settings.validate(), Err(MetroidError::InvalidConfig { .. })));

        let mut settings = Settings::default();
        settings.writer.flush_interval_ms = 0;
        assert!(matches!(settings.validate(), Err(MetroidError::InvalidConfig { .. })));
    }

    #[test]
    fn test_unknown_engine_and_bad_table_name() {
        let mut settings = Settings::default();
        settings.backend.engine = "cassandra".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.table.name = "x".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_parse_key_values() {
        let parsed = parse_key_values(&["threads=4".to_string(), "a = b".to_string()]).unwrap();
        assert_eq!(parsed["threads"], "4");
        assert_eq!(parsed["a"], "b");
        assert!(parse_key_values(&["novalue".to_string()]).is_err());
    }
}
