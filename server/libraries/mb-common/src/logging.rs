//
// Copyright 2025 Tabs Data Inc.
//

use once_cell::sync::OnceCell;
use std::fs::{OpenOptions, create_dir_all};
use std::io::stdout;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Environment variable holding the log filter directives.
pub const LOG_FILTER_ENV: &str = "MB_LOG";

/// Default log filter when [`LOG_FILTER_ENV`] is not set.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Name of the server log file inside the instance log directory.
pub const LOG_FILE: &str = "minibase.log";

static LOG_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Log output destination.
pub enum LogOutput {
    StdOut,
    File(PathBuf),
}

/// Initializes the tracing subscriber. Subsequent calls are no-ops, so tests may
/// call it freely.
pub fn init(output: LogOutput, with_ansi: bool) {
    LOG_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

        let (writer, ansi) = match &output {
            LogOutput::StdOut => (BoxMakeWriter::new(stdout), with_ansi),
            LogOutput::File(path) => {
                if let Some(parent) = path.parent() {
                    let _ = create_dir_all(parent);
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .unwrap_or_else(|err| panic!("Cannot open log file {path:?}: {err}"));
                (BoxMakeWriter::new(file), false)
            }
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true);

        Registry::default().with(filter).with(fmt_layer).init();

        if let LogOutput::File(path) = &output {
            info!("Logging to file {:?}", path);
        }
    });
}
