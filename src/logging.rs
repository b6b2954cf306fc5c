//! Logger setup
//!
//! Everything logs through the `log` facade. `init_logging` installs
//! env_logger once, writing to stderr or appending to a log file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;

static INSTALLED: OnceCell<Option<PathBuf>> = OnceCell::new();

/// `<data-local-dir>/unit-host/logs/unit-host.log`
pub fn default_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("unit-host")
        .join("logs")
        .join("unit-host.log")
}

/// Install the logger. `RUST_LOG` overrides `level`.
///
/// Only the first call has any effect; it returns the log file in use, if any.
pub fn init_logging(level: log::LevelFilter, file: Option<&Path>) -> Option<PathBuf> {
    INSTALLED
        .get_or_init(|| install(level, file))
        .clone()
}

fn install(level: log::LevelFilter, file: Option<&Path>) -> Option<PathBuf> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.parse_default_env();
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] [{}] [{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    let mut log_path = None;
    if let Some(path) = file {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(handle) => {
                builder.target(env_logger::Target::Pipe(Box::new(handle)));
                log_path = Some(path.to_path_buf());
            }
            Err(e) => eprintln!("Could not open log file {}: {}", path.display(), e),
        }
    }

    if builder.try_init().is_err() {
        // Someone else installed a logger (tests, embedding apps)
        return None;
    }

    log::info!("unit-host {} started", env!("CARGO_PKG_VERSION"));
    log_path
}
