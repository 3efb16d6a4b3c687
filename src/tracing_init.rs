//! Shared tracing initialization — every process embedding the scheduler
//! appends structured logs to the same file.

use std::sync::Mutex;

use crate::constants::DATA_DIR_NAME;

/// Initialize tracing to `~/.recursivemanager/scheduler.log` (append
/// mode — multiple processes may write to the same file; short writes
/// under PIPE_BUF are atomic on Linux/macOS).
pub fn init_file_tracing() {
    use tracing_subscriber::EnvFilter;

    let data_dir = dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(DATA_DIR_NAME);
    std::fs::create_dir_all(&data_dir).ok();
    let log_path = data_dir.join("scheduler.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .unwrap_or_else(|_| {
            let null = if cfg!(windows) { "NUL" } else { "/dev/null" };
            std::fs::File::create(null).expect("Cannot create log fallback")
        });

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(log_file))
        .with_target(true)
        .with_ansi(false)
        .init();
}
