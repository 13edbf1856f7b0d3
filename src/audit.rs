//! Fire-and-forget audit trail.
//!
//! Indexing and query outcomes are recorded as [`AuditEvent`]s. Recording
//! never blocks and never fails the caller: [`JsonlAuditSink`] hands events
//! to a background writer thread over a channel, and write errors are only
//! logged.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

/// One audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(kind: &str, details: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            timestamp: Utc::now(),
            details,
        }
    }
}

/// Receives audit events. Implementations must return promptly.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Discards every event.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Appends events as JSON lines from a dedicated writer thread.
///
/// Dropping the sink closes the channel and waits for queued events to be
/// flushed.
pub struct JsonlAuditSink {
    tx: Mutex<Option<mpsc::Sender<AuditEvent>>>,
    worker: Option<thread::JoinHandle<()>>,
    path: PathBuf,
}

impl JsonlAuditSink {
    /// Start the writer thread. The file is opened lazily by the worker, so
    /// an unwritable path degrades to logged warnings rather than an error.
    pub fn start(path: &Path) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<AuditEvent>();
        let worker_path = path.to_path_buf();
        let worker = thread::Builder::new()
            .name("docket-audit".to_string())
            .spawn(move || Self::worker_loop(rx, worker_path))?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Some(worker),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> std::io::Result<BufWriter<File>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }

    fn worker_loop(rx: mpsc::Receiver<AuditEvent>, path: PathBuf) {
        let mut writer = None;
        while let Ok(event) = rx.recv() {
            if writer.is_none() {
                match Self::open(&path) {
                    Ok(w) => writer = Some(w),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, kind = %event.kind, "audit log unavailable, event dropped");
                        continue;
                    }
                }
            }
            let Some(w) = writer.as_mut() else {
                continue;
            };
            let written = serde_json::to_string(&event)
                .map_err(std::io::Error::from)
                .and_then(|line| writeln!(w, "{}", line))
                .and_then(|_| w.flush());
            if let Err(e) = written {
                warn!(path = %path.display(), error = %e, "audit write failed");
                writer = None;
            }
        }
        debug!("audit writer stopped");
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: AuditEvent) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        if let Err(e) = tx.send(event) {
            warn!(kind = %e.0.kind, "audit writer gone, event dropped");
        }
    }
}

impl Drop for JsonlAuditSink {
    fn drop(&mut self) {
        self.tx.lock().take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("audit writer panicked");
            }
        }
    }
}
