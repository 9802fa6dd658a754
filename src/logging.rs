//! Optional tracing setup for the embedding application.
//!
//! The crate itself only emits `tracing` events; installing a subscriber is
//! the application's call. `init` wires up the usual arrangement: a rotated
//! `host.log` in a data directory, line-flushed writes, and an
//! `EnvFilter`-driven level.

use std::path::{Path, PathBuf};

/// Number of rotated log files kept around.
const KEEP_ROTATIONS: u32 = 3;

/// Platform-standard data directory for the host's logs.
///
/// Falls back to `~/.toolhost/` when no platform dir can be resolved.
pub fn default_log_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("toolhost");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolhost")
}

/// Install the global tracing subscriber, writing to `<dir>/host.log`.
///
/// On each startup:
/// 1. Rotates existing logs (host.log → host.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh host.log with a line-flushing writer so entries survive
///    a crash.
/// 3. Logs a startup banner naming the log location.
///
/// Returns an error if the log file cannot be opened; installing twice in
/// one process also fails (the subscriber is global).
pub fn init(log_dir: &Path) -> std::io::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join("host.log");
    rotate_log_file(&log_path, KEEP_ROTATIONS);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("toolhost=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(std::io::Error::other)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "toolhost logging initialized"
    );
    Ok(())
}

/// Rotate log files: `host.log` → `host.log.1` → `.2` → … → `.{keep}`.
///
/// The oldest file beyond `keep` is deleted; missing files in the chain are
/// skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that flushes after every write. `tracing-subscriber` buffers
/// internally; without this, the tail of the log can be lost when the host
/// process dies.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
