//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tracing subscriber setup for gridsec services."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "GRIDSEC_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Writer guards live for the whole process so buffered lines reach their sinks.
static GUARDS: OnceCell<[WorkerGuard; 2]> = OnceCell::new();

/// Console rendering for the daemon. The journal file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the process-wide subscriber for `service_name`.
///
/// Tick timing is logged at `debug`; control actions, threats and link
/// changes at `info`, which is the default filter. `GRIDSEC_LOG`, then
/// `RUST_LOG`, replace that filter. Calling this twice keeps the first
/// subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!(
            "failed to create log directory {}",
            config.directory.display()
        )
    })?;
    let file_name = log_file_name(service_name, config);
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(daily(&config.directory, &file_name));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let (filter, rejected) = log_filter(std::env::var(LOG_ENV).ok());
    let installed = tracing_subscriber::registry()
        .with(console_layer(config.format, stdout_writer))
        .with(
            fmt::layer()
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file_writer)
                .boxed(),
        )
        .with(filter)
        .try_init()
        .is_ok();
    if installed {
        let _ = GUARDS.set([file_guard, stdout_guard]);
    }

    if let Some(directive) = rejected {
        warn!(variable = LOG_ENV, directive = %directive, "invalid log directive ignored");
    }
    info!(
        service = %service_name,
        file = %config.directory.join(&file_name).display(),
        format = ?config.format,
        installed,
        "tracing initialised"
    );
    Ok(())
}

/// Base name of the daily-rolled journal file.
fn log_file_name(service_name: &str, config: &LoggingConfig) -> String {
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    format!("{prefix}.log")
}

/// Filter from the gridsec directive, else `RUST_LOG`, else `info`. An invalid
/// gridsec directive is returned so it can be reported once tracing is live.
fn log_filter(directive: Option<String>) -> (EnvFilter, Option<String>) {
    match directive {
        Some(directive) => match EnvFilter::try_new(&directive) {
            Ok(filter) => (filter, None),
            Err(_) => (EnvFilter::new(DEFAULT_DIRECTIVE), Some(directive)),
        },
        None => (
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)),
            None,
        ),
    }
}

fn console_layer(format: LogFormat, writer: NonBlocking) -> BoxedLayer {
    let layer = fmt::layer().with_timer(fmt::time::UtcTime::rfc_3339());
    match format {
        LogFormat::StructuredJson => layer.with_target(false).json().with_writer(writer).boxed(),
        LogFormat::Pretty => layer.with_writer(writer).boxed(),
    }
}
