//! Configuration for the `unistore` command line tool.
//!
//! Configuration is loaded from the following sources, highest precedence first:
//!
//! 1. Environment variables (prefixed with `UNISTORE__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `UNISTORE__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `UNISTORE__STORAGE__TYPE=filesystem` selects the storage provider
//! - `UNISTORE__STORAGE__PATH=/data` sets the directory name
//! - `UNISTORE__LOGGING__LEVEL=debug` raises the log level
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! storage:
//!   type: filesystem
//!   path: /data
//!
//! logging:
//!   level: debug
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::SecretBox;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use unistore_service::StorageConfig;
use unistore_service::config::ConfigSecret;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "UNISTORE__";

/// [Sentry](https://sentry.io/) error reporting.
///
/// Disabled unless a DSN is provided.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN. When `None`, Sentry integration is disabled.
    ///
    /// # Environment Variable
    ///
    /// `UNISTORE__SENTRY__DSN`
    pub dsn: Option<SecretBox<ConfigSecret>>,

    /// Environment name reported with events, such as `production`.
    pub environment: Option<Cow<'static, str>>,

    /// Host or instance name reported with events.
    pub server_name: Option<Cow<'static, str>>,

    /// Error event sampling rate.
    ///
    /// # Default
    ///
    /// `1.0` (send all errors)
    pub sample_rate: f32,

    /// Performance trace sampling rate.
    ///
    /// # Default
    ///
    /// `0.01`
    pub traces_sample_rate: f32,

    /// Enables debug output of the Sentry SDK on stderr.
    pub debug: bool,

    /// Additional tags attached to all events.
    ///
    /// # Environment Variables
    ///
    /// Each tag is set individually, for example `UNISTORE__SENTRY__TAGS__HOST=nas-1`.
    pub tags: BTreeMap<String, String>,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            server_name: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.01,
            debug: false,
            tags: BTreeMap::new(),
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// [`LogFormat::Pretty`] when stderr is a terminal, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Multi-line output with colors.
    Pretty,

    /// Single-line plain text output.
    ///
    /// ```text
    /// 2024-05-01T12:00:00.000000Z  INFO unistore_service::backend::synology::session: Logged in to DSM
    /// ```
    Simplified,

    /// JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::error::Error for FormatParseError {}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration. Logs are always written to stderr, so that command output on stdout
/// stays clean.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum level of unistore's own log messages.
    ///
    /// `RUST_LOG` takes precedence when set.
    ///
    /// # Default
    ///
    /// `WARN`
    ///
    /// # Environment Variable
    ///
    /// `UNISTORE__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Environment Variable
    ///
    /// `UNISTORE__LOGGING__FORMAT`
    #[serde(with = "display_fromstr")]
    pub format: LogFormat,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogFormat::Auto => "auto",
            LogFormat::Pretty => "pretty",
            LogFormat::Simplified => "simplified",
            LogFormat::Json => "json",
        };
        f.write_str(name)
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::WARN,
            format: LogFormat::Auto,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The storage provider to operate on.
    ///
    /// # Default
    ///
    /// Filesystem storage in the `./data` directory
    ///
    /// # Environment Variables
    ///
    /// - `UNISTORE__STORAGE__TYPE` for the provider type. See [`StorageConfig`] for the available
    ///   options.
    /// - Additional fields depending on the type.
    ///
    /// # Example
    ///
    /// ```yaml
    /// storage:
    ///   type: synology
    ///   endpoint: https://nas.local:5001
    ///   account: backup
    ///   password: ...
    ///   shared_folder: /backups
    /// ```
    pub storage: StorageConfig,

    /// Log verbosity and output format.
    pub logging: Logging,

    /// Optional Sentry error reporting.
    pub sentry: Sentry,
}

impl Config {
    /// Loads configuration from defaults, an optional YAML file and the environment, in that
    /// order.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    use secrecy::ExposeSecret;
    use unistore_service::config::S3Provider;

    use super::*;

    #[test]
    fn defaults_to_local_data_dir() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();
            let StorageConfig::FileSystem { path } = &config.storage else {
                panic!("expected filesystem storage");
            };
            assert_eq!(path, &PathBuf::from("data"));
            assert_eq!(config.logging.level, LevelFilter::WARN);
            assert_eq!(config.logging.format, LogFormat::Auto);
            assert!(!config.sentry.is_enabled());
            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("UNISTORE__STORAGE__TYPE", "s3compatible");
            jail.set_env("UNISTORE__STORAGE__PROVIDER", "minio");
            jail.set_env("UNISTORE__STORAGE__ENDPOINT", "http://localhost:9000");
            jail.set_env("UNISTORE__STORAGE__BUCKET", "whatever");
            jail.set_env("UNISTORE__STORAGE__URL_EXPIRY", "15m");
            jail.set_env("UNISTORE__LOGGING__LEVEL", "debug");
            jail.set_env("UNISTORE__LOGGING__FORMAT", "json");
            jail.set_env("UNISTORE__SENTRY__DSN", "abcde");
            jail.set_env("UNISTORE__SENTRY__SAMPLE_RATE", "0.5");
            jail.set_env("UNISTORE__SENTRY__TAGS__HOST", "nas-1");

            let config = Config::load(None).unwrap();

            let StorageConfig::S3Compatible(s3) = &dbg!(&config).storage else {
                panic!("expected s3 storage");
            };
            assert_eq!(s3.provider, S3Provider::Minio);
            assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
            assert_eq!(s3.bucket, "whatever");
            assert_eq!(s3.url_expiry, Duration::from_secs(15 * 60));

            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.logging.format, LogFormat::Json);

            assert_eq!(config.sentry.dsn.unwrap().expose_secret().as_str(), "abcde");
            assert_eq!(config.sentry.sample_rate, 0.5);
            assert_eq!(config.sentry.tags, [("host".into(), "nas-1".into())].into());

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            storage:
                type: synology
                endpoint: https://nas.local:5001
                account: backup
                password: hunter2
                shared_folder: /backups
                timeout: 10s
            sentry:
                dsn: abcde
                environment: production
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            let StorageConfig::Synology(nas) = &dbg!(&config).storage else {
                panic!("expected synology storage");
            };
            assert_eq!(nas.endpoint, "https://nas.local:5001");
            assert_eq!(nas.account, "backup");
            assert_eq!(nas.password.expose_secret().as_str(), "hunter2");
            assert_eq!(nas.shared_folder, "/backups");
            assert_eq!(nas.application, "FileStation");
            assert_eq!(nas.timeout, Duration::from_secs(10));

            assert_eq!(config.sentry.environment.as_deref(), Some("production"));

            Ok(())
        });
    }

    #[test]
    fn env_overrides_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            storage:
                type: gcs
                bucket: from-yaml
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("UNISTORE__STORAGE__BUCKET", "from-env");

            let config = Config::load(Some(tempfile.path())).unwrap();
            let StorageConfig::Gcs(gcs) = &config.storage else {
                panic!("expected gcs storage");
            };
            assert_eq!(gcs.bucket, "from-env");

            Ok(())
        });
    }

    #[test]
    fn rejects_unknown_log_format() {
        let err = "fancy".parse::<LogFormat>().unwrap_err();
        assert!(err.to_string().contains("fancy"));
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
    }
}
