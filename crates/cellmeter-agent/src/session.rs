//! Session store — the single authority for "is a session active".
//!
//! Holds the singleton [`SessionRecord`] behind one mutex so every
//! transition (start, end, benchmark-lock flip) is a single atomic
//! compare-and-set, never a check-then-act pair. A JSON marker file mirrors
//! the record on disk purely so an unclean shutdown can be detected and
//! reported at the next startup; the in-memory record is authoritative.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use cellmeter_common::models::SessionRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("a session is already active")]
    AlreadyActive,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndError {
    #[error("no active session")]
    NotActive,
}

pub struct SessionStore {
    current: Mutex<Option<SessionRecord>>,
    state_file: Option<PathBuf>,
}

impl SessionStore {
    /// In-memory store with no durable marker.
    pub fn new() -> Self {
        SessionStore {
            current: Mutex::new(None),
            state_file: None,
        }
    }

    /// Store that mirrors the active record to `path` for crash detection.
    pub fn with_state_file(path: PathBuf) -> Self {
        SessionStore {
            current: Mutex::new(None),
            state_file: Some(path),
        }
    }

    /// Discard a marker file left behind by an unclean shutdown.
    ///
    /// A record on disk at startup means the previous process died while a
    /// session was active. Its background tasks are gone, so resuming would
    /// produce a session that measures nothing — delete the record and warn.
    pub fn recover_stale(&self) {
        let Some(ref path) = self.state_file else {
            return;
        };
        if !path.exists() {
            return;
        }
        let stale_id = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str::<SessionRecord>(&text).ok())
            .map(|record| record.session_id);
        tracing::warn!(
            session_id = stale_id.as_deref().unwrap_or("<unparseable>"),
            path = %path.display(),
            "stale session record from an unclean shutdown, discarding"
        );
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(error = %e, "failed to remove stale session file");
        }
    }

    /// Atomically create the singleton record.
    pub fn start(
        &self,
        session_id: &str,
        iccid: &str,
        auto_benchmarks: bool,
    ) -> Result<SessionRecord, StartError> {
        let record = {
            let mut current = self.current.lock().unwrap();
            if current.is_some() {
                return Err(StartError::AlreadyActive);
            }
            let record = SessionRecord {
                session_id: session_id.to_string(),
                iccid: iccid.to_string(),
                auto_benchmarks,
                benchmark_in_progress: false,
            };
            *current = Some(record.clone());
            record
        };
        self.persist(&record);
        tracing::info!(
            session_id = %record.session_id,
            iccid = %record.iccid,
            auto_benchmarks,
            "session started"
        );
        Ok(record)
    }

    /// Atomically delete the record, returning it as it was just before.
    pub fn end(&self) -> Result<SessionRecord, EndError> {
        let record = {
            let mut current = self.current.lock().unwrap();
            current.take().ok_or(EndError::NotActive)?
        };
        if let Some(ref path) = self.state_file {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(error = %e, "failed to remove session file");
                }
            }
        }
        tracing::info!(session_id = %record.session_id, "session ended");
        Ok(record)
    }

    /// Point-in-time snapshot; stale the moment it is returned.
    pub fn state(&self) -> Option<SessionRecord> {
        self.current.lock().unwrap().clone()
    }

    pub fn is_active(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }

    /// Flip `benchmark_in_progress` false→true; returns whether the flip
    /// succeeded. False when no session is active or a run is in progress.
    pub fn acquire_benchmark_lock(&self) -> bool {
        let mut current = self.current.lock().unwrap();
        match current.as_mut() {
            Some(record) if !record.benchmark_in_progress => {
                record.benchmark_in_progress = true;
                true
            }
            _ => false,
        }
    }

    /// Unconditional reset; idempotent, a no-op with no active session.
    pub fn release_benchmark_lock(&self) {
        let mut current = self.current.lock().unwrap();
        if let Some(record) = current.as_mut() {
            record.benchmark_in_progress = false;
        }
    }

    /// Acquire the benchmark lock as an RAII guard, so release happens on
    /// every exit path of the run that holds it.
    pub fn try_begin_benchmark(self: &Arc<Self>) -> Option<BenchmarkGuard> {
        if self.acquire_benchmark_lock() {
            Some(BenchmarkGuard {
                store: Arc::clone(self),
            })
        } else {
            None
        }
    }

    fn persist(&self, record: &SessionRecord) {
        let Some(ref path) = self.state_file else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_vec(record) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(path, bytes) {
                    tracing::warn!(error = %e, path = %path.display(), "failed to persist session record");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize session record"),
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the benchmark lock for the duration of one suite run.
pub struct BenchmarkGuard {
    store: Arc<SessionStore>,
}

impl Drop for BenchmarkGuard {
    fn drop(&mut self) {
        self.store.release_benchmark_lock();
    }
}
