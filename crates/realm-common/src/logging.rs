//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tracing bootstrap for processes embedding the orchestrator."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Filter override consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "REALM_LOG";

static WRITER_GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

/// Output shape of the stdout layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
    Compact,
}

/// Pick the filter directive: `REALM_LOG`, then `RUST_LOG`, then the configured level.
fn filter_directive(realm_log: Option<String>, rust_log: Option<String>, level: &str) -> String {
    [realm_log, rust_log]
        .into_iter()
        .flatten()
        .map(|directive| directive.trim().to_owned())
        .find(|directive| !directive.is_empty())
        .unwrap_or_else(|| level.to_owned())
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    let directive = filter_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        &config.level,
    );
    EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("invalid log directive '{directive}' ({err}); using '{}'", config.level);
        EnvFilter::new(&config.level)
    })
}

fn stdout_layer<S>(format: LogFormat, writer: NonBlocking) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    let layer = fmt::layer()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(writer);
    match format {
        LogFormat::StructuredJson => layer.json().with_current_span(true).boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().with_target(false).boxed(),
    }
}

/// Install the global subscriber for a process hosting the orchestrator.
///
/// The stdout layer follows [`LoggingConfig::format`]. With `file_output` enabled, realm
/// lifecycle events are also written as JSON to a daily file named
/// `<prefix>-<service>.log` under [`LoggingConfig::directory`]. A second call keeps the
/// first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let mut guards = Vec::with_capacity(2);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let file_layer = if config.file_output {
        std::fs::create_dir_all(&config.directory).with_context(|| {
            format!("unable to create log directory {}", config.directory.display())
        })?;
        let prefix = config.file_prefix.as_deref().unwrap_or("realm");
        let appender =
            rolling::daily(&config.directory, format!("{prefix}-{service_name}.log"));
        let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
        guards.push(file_guard);
        Some(
            fmt::layer()
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_current_span(true)
                .with_writer(file_writer),
        )
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(stdout_layer(config.format, stdout_writer))
        .with(file_layer)
        .try_init()
        .is_ok();
    if installed {
        let _ = WRITER_GUARDS.set(guards);
    }

    info!(
        service = %service_name,
        format = ?config.format,
        file_output = config.file_output,
        installed,
        "tracing initialised"
    );
    Ok(())
}
