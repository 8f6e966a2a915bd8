//! Tracing subscriber setup shared by the service binaries

use crate::config::LoggingConfig;
use crate::Result;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the configured level. When `logging.file` is set,
/// output is appended to that file without ANSI colouring.
pub fn init_tracing(logging: &LoggingConfig, crate_targets: &[&str]) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives: Vec<String> = crate_targets
            .iter()
            .map(|target| format!("{}={}", target, logging.level))
            .chain(std::iter::once("tower_http=info".to_string()))
            .collect();
        EnvFilter::new(directives.join(","))
    });

    match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }

    Ok(())
}
