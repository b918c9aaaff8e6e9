use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use lockstep_core::OperationRecord;
use tracing::{debug, error, info, warn};

pub const DEFAULT_LOGGER_NAME: &str = "lockstep";

const MAX_LOG_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl AuditLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Append-only, line-oriented audit trail for one run.
///
/// Created when the run starts and handed to the change recorder; `finish` flushes it.
/// Every operation record passed through `record` is also kept in memory for the summary.
pub struct AuditLog {
    logger: String,
    path: Option<PathBuf>,
    sink: Box<dyn Write>,
    records: Vec<OperationRecord>,
}

impl AuditLog {
    /// Opens a fresh `%Y%m%d%H%M%S.log` file inside `log_dir`, creating the directory if needed.
    pub fn create_in(log_dir: &Path, logger: &str) -> Result<Self> {
        Self::create_stamped(log_dir, logger, &Local::now())
    }

    /// Never reuses an existing file: a run started in the same second gets a `-N` suffix.
    pub fn create_stamped(log_dir: &Path, logger: &str, now: &DateTime<Local>) -> Result<Self> {
        fs::create_dir_all(log_dir).with_context(|| {
            format!("filesystem-failed: failed creating log directory {}", log_dir.display())
        })?;

        for attempt in 0..MAX_LOG_NAME_ATTEMPTS {
            let path = log_dir.join(numbered_log_file_name(now, attempt));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    let mut log = Self::to_writer(BufWriter::new(file), logger);
                    log.path = Some(path);
                    return Ok(log);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("filesystem-failed: failed creating audit log {}", path.display())
                    });
                }
            }
        }

        anyhow::bail!(
            "filesystem-failed: no free audit log name for {} in {}",
            log_file_name(now),
            log_dir.display()
        )
    }

    pub fn to_writer(writer: impl Write + 'static, logger: &str) -> Self {
        Self {
            logger: logger.to_string(),
            path: None,
            sink: Box::new(writer),
            records: Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn records(&self) -> &[OperationRecord] {
        &self.records
    }

    pub fn log(&mut self, level: AuditLevel, message: &str) -> Result<()> {
        match level {
            AuditLevel::Debug => debug!(target: "lockstep::audit", "{message}"),
            AuditLevel::Info => info!(target: "lockstep::audit", "{message}"),
            AuditLevel::Warning => warn!(target: "lockstep::audit", "{message}"),
            AuditLevel::Error => error!(target: "lockstep::audit", "{message}"),
        }
        let line = format_audit_line(&self.logger, level, &Local::now().naive_local(), message);
        writeln!(self.sink, "{line}").context("filesystem-failed: failed writing audit log")
    }

    pub fn info(&mut self, message: &str) -> Result<()> {
        self.log(AuditLevel::Info, message)
    }

    pub fn record(&mut self, record: OperationRecord) -> Result<()> {
        self.info(&record.audit_line())?;
        self.records.push(record);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink
            .flush()
            .context("filesystem-failed: failed flushing audit log")
    }

    pub fn finish(mut self) -> Result<Vec<OperationRecord>> {
        self.flush()?;
        Ok(std::mem::take(&mut self.records))
    }
}

pub fn log_file_name(now: &DateTime<Local>) -> String {
    numbered_log_file_name(now, 0)
}

fn numbered_log_file_name(now: &DateTime<Local>, attempt: usize) -> String {
    let stamp = now.format("%Y%m%d%H%M%S");
    match attempt {
        0 => format!("{stamp}.log"),
        n => format!("{stamp}-{n}.log"),
    }
}

pub fn format_audit_line(
    logger: &str,
    level: AuditLevel,
    timestamp: &NaiveDateTime,
    message: &str,
) -> String {
    format!(
        "{}:{}:{}:{}",
        logger,
        level.as_str(),
        timestamp.format("%Y-%m-%d %H:%M:%S"),
        message
    )
}
