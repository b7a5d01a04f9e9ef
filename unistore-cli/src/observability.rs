//! Logging and error reporting setup.

use std::env;
use std::io::IsTerminal;

use secrecy::ExposeSecret;
use sentry::integrations::tracing as sentry_tracing;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::{Config, LogFormat};

/// Crates whose log level follows [`Logging::level`](crate::config::Logging::level).
const CRATE_NAMES: &[&str] = &["unistore", "unistore_cli", "unistore_service", "unistore_types"];

/// Initializes Sentry if a DSN is configured. Events are flushed when the guard drops.
pub fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    let config = &config.sentry;
    let dsn = config.dsn.as_ref()?;

    let guard = sentry::init(sentry::ClientOptions {
        dsn: dsn.expose_secret().as_str().parse().ok(),
        release: sentry::release_name!(),
        environment: config.environment.clone(),
        server_name: config.server_name.clone(),
        sample_rate: config.sample_rate,
        traces_sample_rate: config.traces_sample_rate,
        debug: config.debug,
        enable_logs: true,
        ..Default::default()
    });

    sentry::configure_scope(|scope| {
        for (key, value) in &config.tags {
            scope.set_tag(key, value);
        }
    });

    Some(guard)
}

/// Installs the global tracing subscriber writing to stderr.
pub fn init_tracing(config: &Config) {
    // Warnings and errors become Sentry events, INFO is sent as logs.
    let sentry_layer = config.sentry.is_enabled().then(|| {
        sentry_tracing::layer().event_filter(|metadata| match *metadata.level() {
            Level::ERROR | Level::WARN => {
                sentry_tracing::EventFilter::Event | sentry_tracing::EventFilter::Log
            }
            Level::INFO => sentry_tracing::EventFilter::Log,
            Level::DEBUG | Level::TRACE => sentry_tracing::EventFilter::Ignore,
        })
    });

    let format = match config.logging.format {
        LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    };

    let fmt_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Simplified | LogFormat::Auto => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sentry_layer)
        .with(env_filter(config.logging.level))
        .init();
}

/// Uses `RUST_LOG` literally when set, otherwise applies `level` to unistore's crates.
fn env_filter(level: LevelFilter) -> EnvFilter {
    match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => EnvFilter::new(value),
        Err(_) => EnvFilter::new(default_directives(level)),
    }
}

/// Dependencies stay at `WARN` unless `level` is quieter.
fn default_directives(level: LevelFilter) -> String {
    let mut directives = LevelFilter::WARN.min(level).to_string();
    for name in CRATE_NAMES {
        directives.push_str(&format!(",{name}={level}"));
    }
    directives
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_target_own_crates() {
        let directives = default_directives(LevelFilter::DEBUG).to_lowercase();
        assert_eq!(
            directives,
            "warn,unistore=debug,unistore_cli=debug,unistore_service=debug,unistore_types=debug"
        );

        let directives = default_directives(LevelFilter::OFF).to_lowercase();
        assert!(directives.starts_with("off,"), "{directives}");
    }
}
