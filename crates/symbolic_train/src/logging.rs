//! Logging - Console + file logging and the console-mirror output sink
//!
//! Structured logs go through `tracing` to stdout and
//! `logs/symbolic_training_<ts>.log`. Human-readable banners are written to
//! an [`OutputTee`] that is handed explicitly to whoever prints them; it
//! mirrors stdout into `logs/symbolic_output_<ts>.log`.

use std::fs::{self, File};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;

/// Writes everything to the console and to a line-buffered file.
///
/// The file is flushed and closed when the tee is dropped.
pub struct OutputTee<W: Write = io::Stdout> {
    console: W,
    file: LineWriter<File>,
    path: PathBuf,
}

impl OutputTee<io::Stdout> {
    pub fn create(path: &Path) -> Result<Self> {
        Self::with_console(io::stdout(), path)
    }
}

impl<W: Write> OutputTee<W> {
    pub fn with_console(console: W, path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output log {}", path.display()))?;
        Ok(Self {
            console,
            file: LineWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<W: Write> Write for OutputTee<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.console.write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.console.flush()?;
        self.file.flush()
    }
}

/// Everything a run needs to keep alive for its log output.
pub struct LogSession {
    pub logs_dir: PathBuf,
    pub timestamp: String,
    pub training_log: PathBuf,
    pub tee: OutputTee,
    _guard: Option<WorkerGuard>,
}

pub fn session_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Creates `<output_dir>/logs`, installs the global tracing subscriber and
/// opens the console-mirror file.
pub fn setup_logging(output_dir: &Path) -> Result<LogSession> {
    let logs_dir = output_dir.join("logs");
    fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create {}", logs_dir.display()))?;

    let timestamp = session_timestamp();
    let training_log_name = format!("symbolic_training_{timestamp}.log");
    let training_log = logs_dir.join(&training_log_name);

    // 1. File logging
    let file_appender = tracing_appender::rolling::never(&logs_dir, &training_log_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // 2. Console logging
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    // 3. Combine subscribers
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer()) // Stdout
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        ) // File
        .try_init();
    if let Err(e) = installed {
        eprintln!("Tracing subscriber already installed, file log disabled: {e}");
    }

    let tee = OutputTee::create(&logs_dir.join(format!("symbolic_output_{timestamp}.log")))?;

    Ok(LogSession {
        logs_dir,
        timestamp,
        training_log,
        tee,
        _guard: Some(guard),
    })
}

/// Routes panics through `tracing` so they land in the training log.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(target: "panic", "CRASH detected at {}: {}", location, msg);
        eprintln!("CRASH detected at {}: {}", location, msg);
    }));
}
