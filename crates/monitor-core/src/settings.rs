use clap::Parser;
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable that forces debug logging when set.
pub const DEBUG_ENV_VAR: &str = "DEBUG";

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// GNSS jamming monitor for u-blox receivers
#[derive(Parser, Debug, Clone)]
#[command(
    name = "jam-monitor",
    about = "GNSS jamming monitor for u-blox receivers",
    version
)]
pub struct Settings {
    /// Configuration file
    #[arg(short = 'c', long, default_value = "config.yml")]
    pub config: PathBuf,

    /// Serial port
    #[arg(short = 'p', long)]
    pub port: Option<PathBuf>,

    /// Serial baud rate
    #[arg(short = 'b', long, default_value = "115200")]
    pub baudrate: u32,

    /// Output file for time-series data. A date is appended to each file so
    /// records are split per day.
    #[arg(short = 'o', long, default_value = "data/output")]
    pub output: PathBuf,

    /// Slack webhook url for notifications
    #[arg(short = 's', long = "slack_url", alias = "slack-url")]
    pub slack_url: Option<String>,

    /// Path to sqlite3 database file (will be created if missing)
    #[arg(short = 'd', long = "db_path", alias = "db-path")]
    pub db_path: Option<PathBuf>,

    /// Suppress lifecycle notifications
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Jamming index above which an alert is raised (0-255)
    #[arg(long, default_value = "50")]
    pub jam_threshold: u8,

    /// Jamming index at or below which an alert clears (defaults to the jam threshold)
    #[arg(long)]
    pub recovery_threshold: Option<u8>,

    /// Failed reconnect attempts tolerated per outage (unlimited if unset)
    #[arg(long)]
    pub max_reconnects: Option<u32>,

    /// Initial delay between reconnect attempts in milliseconds
    #[arg(long, default_value = "1000")]
    pub reconnect_delay_ms: u64,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Settings {
    /// Log level after applying `--debug` and the `DEBUG` environment variable.
    pub fn effective_log_level(&self) -> String {
        self.log_level_with_env(debug_env_set(std::env::var_os(DEBUG_ENV_VAR).as_deref()))
    }

    fn log_level_with_env(&self, debug_env: bool) -> String {
        if self.debug || debug_env {
            "DEBUG".to_string()
        } else {
            self.log_level.clone()
        }
    }
}

/// An empty `DEBUG=` counts as unset.
fn debug_env_set(value: Option<&OsStr>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

// ── FileConfig ─────────────────────────────────────────────────────────────────

/// Keys accepted in the YAML config file. Unknown keys are ignored.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct FileConfig {
    /// `Some(None)` when the file sets `port: ~`, which unsets the port
    /// instead of deferring to `--port`.
    #[serde(default, deserialize_with = "explicit_null")]
    pub port: Option<Option<PathBuf>>,
    pub baudrate: Option<u32>,
    pub output: Option<PathBuf>,
    pub slack_webhook_url: Option<String>,
    pub db_path: Option<PathBuf>,
    pub jam_threshold: Option<u8>,
    pub recovery_threshold: Option<u8>,
    pub max_reconnects: Option<u32>,
}

/// Deserialise a present key as `Some(value)`, keeping an explicit null.
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl FileConfig {
    /// Read the config file at `path`.
    ///
    /// A missing file contributes no overrides. Any other read failure, or
    /// content that is not a YAML mapping, is [`ConfigError::FileUnreadable`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using flags only");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::FileUnreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        tracing::info!(path = %path.display(), "reading config file");
        Self::parse(path, &content)
    }

    /// Parse YAML text. `path` is only used for error messages.
    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let unreadable = |reason: String| ConfigError::FileUnreadable {
            path: path.to_path_buf(),
            reason,
        };

        let value: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| unreadable(e.to_string()))?;

        match &value {
            serde_yaml::Value::Null => return Ok(Self::default()),
            serde_yaml::Value::Mapping(map) if map.is_empty() => return Ok(Self::default()),
            serde_yaml::Value::Mapping(_) => {}
            other => {
                return Err(unreadable(format!(
                    "expected a key/value mapping, found {}",
                    yaml_kind(other)
                )))
            }
        }

        serde_yaml::from_value(value)
            .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))
    }
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a boolean",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a sequence",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}

// ── EffectiveConfig ────────────────────────────────────────────────────────────

/// The merged, immutable configuration the monitor runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub device_path: PathBuf,
    pub baud_rate: u32,
    pub output: PathBuf,
    pub slack_url: Option<String>,
    pub db_path: Option<PathBuf>,
    pub quiet: bool,
    pub jam_threshold: u8,
    pub recovery_threshold: u8,
    pub max_reconnects: Option<u32>,
    pub reconnect_delay: Duration,
}

impl EffectiveConfig {
    /// Fail with [`ConfigError::DeviceMissing`] unless the device node exists.
    pub fn ensure_device_present(&self) -> Result<(), ConfigError> {
        if self.device_path.exists() {
            Ok(())
        } else {
            Err(ConfigError::DeviceMissing(self.device_path.clone()))
        }
    }
}

// ── ConfigResolver ─────────────────────────────────────────────────────────────

/// Merges the config file over command-line flags.
///
/// For every key the config file wins when it defines a value; otherwise the
/// flag (or its built-in default) is used.
pub struct ConfigResolver;

impl ConfigResolver {
    /// Read `settings.config` and merge it with `settings`.
    pub fn resolve(settings: &Settings) -> Result<EffectiveConfig, ConfigError> {
        let file = FileConfig::load(&settings.config)?;
        Self::merge(file, settings)
    }

    /// Merge an already-loaded file config with the flags.
    pub fn merge(file: FileConfig, flags: &Settings) -> Result<EffectiveConfig, ConfigError> {
        let device_path = match file.port {
            Some(from_file) => from_file,
            None => flags.port.clone(),
        }
        .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                ConfigError::Invalid(
                    "no device port configured; pass --port or set `port` in the config file"
                        .to_string(),
                )
            })?;

        let baud_rate = file.baudrate.unwrap_or(flags.baudrate);
        if baud_rate == 0 {
            return Err(ConfigError::Invalid("baud rate must be positive".to_string()));
        }
        if flags.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect delay must be at least 1 ms".to_string(),
            ));
        }

        let jam_threshold = file.jam_threshold.unwrap_or(flags.jam_threshold);
        let recovery_threshold = file
            .recovery_threshold
            .or(flags.recovery_threshold)
            .unwrap_or(jam_threshold);
        if recovery_threshold > jam_threshold {
            return Err(ConfigError::Invalid(format!(
                "recovery threshold {recovery_threshold} is above jam threshold {jam_threshold}"
            )));
        }

        Ok(EffectiveConfig {
            device_path,
            baud_rate,
            output: file.output.unwrap_or_else(|| flags.output.clone()),
            slack_url: file.slack_webhook_url.or_else(|| flags.slack_url.clone()),
            db_path: file.db_path.or_else(|| flags.db_path.clone()),
            quiet: flags.quiet,
            jam_threshold,
            recovery_threshold,
            max_reconnects: file.max_reconnects.or(flags.max_reconnects),
            reconnect_delay: Duration::from_millis(flags.reconnect_delay_ms),
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn flags(args: &[&str]) -> Settings {
        let mut argv = vec!["jam-monitor"];
        argv.extend_from_slice(args);
        Settings::parse_from(argv)
    }

    fn write_config(tmp: &TempDir, content: &str) -> PathBuf {
        let path = tmp.path().join("config.yml");
        std::fs::write(&path, content).expect("write config");
        path
    }

    // ── CLI parsing ───────────────────────────────────────────────────────

    #[test]
    fn test_settings_default_values() {
        let settings = flags(&[]);
        assert_eq!(settings.config, PathBuf::from("config.yml"));
        assert!(settings.port.is_none());
        assert_eq!(settings.baudrate, 115_200);
        assert_eq!(settings.output, PathBuf::from("data/output"));
        assert!(settings.slack_url.is_none());
        assert!(settings.db_path.is_none());
        assert!(!settings.quiet);
        assert_eq!(settings.jam_threshold, 50);
        assert!(settings.recovery_threshold.is_none());
        assert!(settings.max_reconnects.is_none());
        assert_eq!(settings.reconnect_delay_ms, 1000);
        assert_eq!(settings.log_level, "INFO");
        assert!(!settings.debug);
    }

    #[test]
    fn test_settings_underscore_flags() {
        let settings = flags(&[
            "--slack_url",
            "https://hooks.slack.com/services/T/B/X",
            "--db_path",
            "/var/lib/jam.db",
        ]);
        assert_eq!(
            settings.slack_url.as_deref(),
            Some("https://hooks.slack.com/services/T/B/X")
        );
        assert_eq!(settings.db_path, Some(PathBuf::from("/var/lib/jam.db")));
    }

    #[test]
    fn test_settings_short_flags() {
        let settings = flags(&["-p", "/dev/ttyUSB0", "-b", "9600", "-q"]);
        assert_eq!(settings.port, Some(PathBuf::from("/dev/ttyUSB0")));
        assert_eq!(settings.baudrate, 9600);
        assert!(settings.quiet);
    }

    #[test]
    fn test_jam_threshold_rejects_out_of_range() {
        let result = Settings::try_parse_from(["jam-monitor", "--jam-threshold", "300"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_overrides_log_level() {
        assert_eq!(flags(&["--debug"]).log_level_with_env(false), "DEBUG");
        assert_eq!(flags(&[]).log_level_with_env(true), "DEBUG");
        assert_eq!(
            flags(&["--log-level", "WARNING"]).log_level_with_env(false),
            "WARNING"
        );
    }

    #[test]
    fn test_empty_debug_env_is_unset() {
        assert!(!debug_env_set(None));
        assert!(!debug_env_set(Some(OsStr::new(""))));
        assert!(debug_env_set(Some(OsStr::new("1"))));
        assert!(debug_env_set(Some(OsStr::new("false"))));
    }

    // ── FileConfig ────────────────────────────────────────────────────────

    #[test]
    fn test_missing_file_contributes_nothing() {
        let tmp = TempDir::new().expect("tempdir");
        let loaded = FileConfig::load(&tmp.path().join("absent.yml")).expect("load");
        assert_eq!(loaded, FileConfig::default());
    }

    #[test]
    fn test_empty_file_is_valid() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_config(&tmp, "");
        assert_eq!(FileConfig::load(&path).expect("load"), FileConfig::default());
    }

    #[test]
    fn test_empty_mapping_is_valid() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_config(&tmp, "{}\n");
        assert_eq!(FileConfig::load(&path).expect("load"), FileConfig::default());
    }

    #[test]
    fn test_malformed_yaml_is_unreadable() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_config(&tmp, "port: [/dev/ttyACM0\n  baud: {");
        let err = FileConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::FileUnreadable { .. }), "{err}");
    }

    #[test]
    fn test_scalar_document_is_unreadable() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_config(&tmp, "just some text\n");
        let err = FileConfig::load(&path).unwrap_err();
        match err {
            ConfigError::FileUnreadable { reason, .. } => assert!(reason.contains("a string")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_value_type_is_invalid() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_config(&tmp, "jam_threshold: loud\n");
        let err = FileConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_config(&tmp, "port: /dev/ttyACM0\ncolour: blue\n");
        let loaded = FileConfig::load(&path).expect("load");
        assert_eq!(loaded.port, Some(Some(PathBuf::from("/dev/ttyACM0"))));
    }

    // ── ConfigResolver ────────────────────────────────────────────────────

    #[test]
    fn test_file_wins_and_flag_fills_gaps() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_config(&tmp, "port: \"/dev/ttyACM0\"\n");
        let config_arg = path.to_string_lossy().to_string();
        let settings = flags(&[
            "--config",
            &config_arg,
            "--baudrate",
            "9600",
            "--port",
            "/dev/ttyUSB0",
        ]);

        let config = ConfigResolver::resolve(&settings).expect("resolve");
        assert_eq!(config.device_path, PathBuf::from("/dev/ttyACM0"));
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn test_every_file_key_overrides_its_flag() {
        let file = FileConfig {
            port: Some(Some(PathBuf::from("/dev/file-port"))),
            baudrate: Some(38_400),
            output: Some(PathBuf::from("/srv/jam/out")),
            slack_webhook_url: Some("https://file.example/hook".to_string()),
            db_path: Some(PathBuf::from("/srv/jam/file.db")),
            jam_threshold: Some(80),
            recovery_threshold: Some(60),
            max_reconnects: Some(3),
        };
        let settings = flags(&[
            "-p",
            "/dev/flag-port",
            "-b",
            "9600",
            "-o",
            "flag-out",
            "-s",
            "https://flag.example/hook",
            "-d",
            "flag.db",
            "--jam-threshold",
            "20",
            "--recovery-threshold",
            "10",
            "--max-reconnects",
            "9",
        ]);

        let config = ConfigResolver::merge(file, &settings).expect("merge");
        assert_eq!(config.device_path, PathBuf::from("/dev/file-port"));
        assert_eq!(config.baud_rate, 38_400);
        assert_eq!(config.output, PathBuf::from("/srv/jam/out"));
        assert_eq!(config.slack_url.as_deref(), Some("https://file.example/hook"));
        assert_eq!(config.db_path, Some(PathBuf::from("/srv/jam/file.db")));
        assert_eq!(config.jam_threshold, 80);
        assert_eq!(config.recovery_threshold, 60);
        assert_eq!(config.max_reconnects, Some(3));
    }

    #[test]
    fn test_flags_used_when_file_is_empty() {
        let settings = flags(&[
            "-p",
            "/dev/flag-port",
            "-s",
            "https://flag.example/hook",
            "-d",
            "flag.db",
            "--reconnect-delay-ms",
            "250",
        ]);

        let config = ConfigResolver::merge(FileConfig::default(), &settings).expect("merge");
        assert_eq!(config.device_path, PathBuf::from("/dev/flag-port"));
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.output, PathBuf::from("data/output"));
        assert_eq!(config.slack_url.as_deref(), Some("https://flag.example/hook"));
        assert_eq!(config.db_path, Some(PathBuf::from("flag.db")));
        assert_eq!(config.recovery_threshold, config.jam_threshold);
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_port_is_invalid() {
        let err = ConfigResolver::merge(FileConfig::default(), &flags(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn test_empty_port_is_invalid() {
        let file = FileConfig {
            port: Some(Some(PathBuf::new())),
            ..Default::default()
        };
        let err = ConfigResolver::merge(file, &flags(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn test_null_port_in_file_unsets_the_flag() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_config(&tmp, "port: ~\nbaudrate: 9600\n");
        let loaded = FileConfig::load(&path).expect("load");
        assert_eq!(loaded.port, Some(None));

        let config_arg = path.to_string_lossy().to_string();
        let settings = flags(&["--config", &config_arg, "-p", "/dev/ttyUSB0"]);
        let err = ConfigResolver::resolve(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn test_omitted_port_in_file_defers_to_flag() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_config(&tmp, "baudrate: 9600\n");
        assert_eq!(FileConfig::load(&path).expect("load").port, None);
    }

    #[test]
    fn test_zero_reconnect_delay_is_invalid() {
        let settings = flags(&["-p", "/dev/ttyACM0", "--reconnect-delay-ms", "0"]);
        let err = ConfigResolver::merge(FileConfig::default(), &settings).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
        assert!(err.to_string().contains("reconnect delay"), "{err}");
    }

    #[test]
    fn test_recovery_above_jam_threshold_is_invalid() {
        let settings = flags(&[
            "-p",
            "/dev/ttyACM0",
            "--jam-threshold",
            "40",
            "--recovery-threshold",
            "41",
        ]);
        let err = ConfigResolver::merge(FileConfig::default(), &settings).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn test_malformed_file_fails_resolution() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_config(&tmp, "- just\n- a list\n");
        let config_arg = path.to_string_lossy().to_string();
        let settings = flags(&["--config", &config_arg, "-p", "/dev/ttyACM0"]);
        let err = ConfigResolver::resolve(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::FileUnreadable { .. }), "{err}");
    }

    #[test]
    fn test_ensure_device_present() {
        let tmp = TempDir::new().expect("tempdir");
        let device = tmp.path().join("ttyFAKE0");
        std::fs::write(&device, b"").expect("create device stand-in");

        let mut config =
            ConfigResolver::merge(FileConfig::default(), &flags(&["-p", "/dev/null"]))
                .expect("merge");
        config.device_path = device.clone();
        assert!(config.ensure_device_present().is_ok());

        config.device_path = tmp.path().join("ttyMISSING");
        match config.ensure_device_present() {
            Err(ConfigError::DeviceMissing(path)) => assert_eq!(path, tmp.path().join("ttyMISSING")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
