//! Per-package audit log.
//!
//! Every package carries a plain-text `.log` file with one `LEVEL:message`
//! line per event. Lines are mirrored to the process log.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Debug => "DEBUG",
            AuditLevel::Info => "INFO",
            AuditLevel::Warning => "WARNING",
            AuditLevel::Error => "ERROR",
        }
    }
}

/// Append-only writer for a package's audit log
pub struct AuditLog {
    writer: BufWriter<File>,
}

impl AuditLog {
    /// Create (or truncate) the log file at `path`
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn info(&mut self, message: impl AsRef<str>) -> io::Result<()> {
        self.record(AuditLevel::Info, message.as_ref())
    }

    pub fn warning(&mut self, message: impl AsRef<str>) -> io::Result<()> {
        self.record(AuditLevel::Warning, message.as_ref())
    }

    /// Write one line and flush it
    pub fn record(&mut self, level: AuditLevel, message: &str) -> io::Result<()> {
        match level {
            AuditLevel::Debug => debug!(target: "audit", "{}", message),
            AuditLevel::Info => info!(target: "audit", "{}", message),
            AuditLevel::Warning => warn!(target: "audit", "{}", message),
            AuditLevel::Error => error!(target: "audit", "{}", message),
        }

        writeln!(self.writer, "{}:{}", level.as_str(), message)?;
        self.writer.flush()
    }
}
