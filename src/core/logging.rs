//! Structured logging
//!
//! Installs the global `tracing` subscriber described by [`LoggingConfig`].
//! `RUST_LOG` overrides the configured level. File output goes through a
//! size-rotated writer running on the non-blocking worker thread.

use crate::core::config::LoggingConfig;
use anyhow::{anyhow, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => Err(anyhow!("Unknown log format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LogOutput {
    Stdout,
    File(PathBuf),
}

impl LogOutput {
    fn from_config(config: &LoggingConfig) -> Result<Self> {
        match config.output.as_str() {
            "stdout" => Ok(LogOutput::Stdout),
            "file" => config
                .log_file
                .clone()
                .map(LogOutput::File)
                .context("logging.log_file is required for file output"),
            other => Err(anyhow!("Unknown log output: {}", other)),
        }
    }

    fn writer(&self, config: &LoggingConfig) -> Result<(NonBlocking, WorkerGuard)> {
        match self {
            LogOutput::Stdout => Ok(tracing_appender::non_blocking(io::stdout())),
            LogOutput::File(path) => {
                let file = SizeRotatingFile::open(path, config.max_file_size, config.max_backups)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                Ok(tracing_appender::non_blocking(file))
            }
        }
    }
}

/// Holds the log worker guard; dropping it flushes pending lines
pub struct Logger {
    _guard: WorkerGuard,
}

impl Logger {
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let level = Level::from_str(&config.level)
            .map_err(|_| anyhow!("Unknown log level: {}", config.level))?;
        let format = LogFormat::from_str(&config.format)?;
        let output = LogOutput::from_config(config)?;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));
        let (writer, guard) = output.writer(config)?;

        let layer = match format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_current_span(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(writer)
                .boxed(),
            LogFormat::Text => fmt::layer().with_target(true).with_writer(writer).boxed(),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .context("installing tracing subscriber")?;

        tracing::info!(level = %level, format = ?format, output = ?output, "Logging initialized");
        Ok(Self { _guard: guard })
    }
}

/// Appends to `path`; once a write would pass `max_size` bytes the file
/// shifts to `path.1`, older backups shift up and the oldest past
/// `max_backups` is dropped
struct SizeRotatingFile {
    path: PathBuf,
    max_size: u64,
    max_backups: usize,
    file: File,
    written: u64,
}

impl SizeRotatingFile {
    fn open(path: &Path, max_size: usize, max_backups: usize) -> io::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = Self::append(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_size: max_size as u64,
            max_backups,
            file,
            written,
        })
    }

    fn append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn backup(&self, n: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.max_backups == 0 {
            self.file = File::create(&self.path)?;
        } else {
            let oldest = self.backup(self.max_backups);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for n in (1..self.max_backups).rev() {
                let from = self.backup(n);
                if from.exists() {
                    fs::rename(&from, self.backup(n + 1))?;
                }
            }
            fs::rename(&self.path, self.backup(1))?;
            self.file = Self::append(&self.path)?;
        }
        self.written = 0;
        Ok(())
    }
}

impl Write for SizeRotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
