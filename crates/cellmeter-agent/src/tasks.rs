//! Task orchestrator — named background loops bound to the session lifetime.
//!
//! Two loops run while a session is active: the high-frequency loop samples
//! the router's radio state every second or two, and the low-frequency loop
//! periodically runs the benchmark suite when auto-benchmarks are enabled.
//! A manual benchmark trigger registers a one-shot `benchmark` task.
//!
//! Cancellation is cooperative: each task gets a watch channel and observes
//! it only at iteration boundaries (during the pacing delay), so in-flight
//! network calls always run to completion or their own timeout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use cellmeter_common::models::SessionRecord;

use crate::bench;
use crate::state::AgentState;

pub const HIGH_FREQUENCY: &str = "high_frequency";
pub const LOW_FREQUENCY: &str = "low_frequency";
pub const BENCHMARK: &str = "benchmark";

struct TaskHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Registry of named cancellable background tasks.
pub struct TaskOrchestrator {
    tasks: Mutex<HashMap<String, TaskHandle>>,
}

impl TaskOrchestrator {
    pub fn new() -> Self {
        TaskOrchestrator {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Launch a named task. A previous task under the same name is
    /// cancelled and its handle replaced.
    pub fn spawn<F, Fut>(&self, name: &str, task: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, cancel_rx) = watch::channel(false);
        let join = tokio::spawn(task(cancel_rx));
        let previous = self
            .tasks
            .lock()
            .unwrap()
            .insert(name.to_string(), TaskHandle { cancel, join });
        if let Some(previous) = previous {
            let _ = previous.cancel.send(true);
        }
        tracing::debug!(task = name, "background task registered");
    }

    /// Signal every registered task and clear the registry. Idempotent and
    /// safe with an empty registry; does not wait for tasks to finish.
    pub fn cancel_all(&self) {
        let drained: Vec<(String, TaskHandle)> =
            self.tasks.lock().unwrap().drain().collect();
        for (name, handle) in drained {
            let _ = handle.cancel.send(true);
            tracing::debug!(task = %name, "background task cancelled");
        }
    }

    /// Cancel everything and give tasks a bounded window to finish; used at
    /// process shutdown.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, TaskHandle)> =
            self.tasks.lock().unwrap().drain().collect();
        for (name, handle) in drained {
            let _ = handle.cancel.send(true);
            if tokio::time::timeout(Duration::from_secs(5), handle.join)
                .await
                .is_err()
            {
                tracing::warn!(task = %name, "background task did not stop in time");
            }
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

impl Default for TaskOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Session loops ───────────────────────────────────────────────────

/// Register and launch the loops for a freshly started session.
pub fn start_session_tasks(state: &Arc<AgentState>, record: &SessionRecord) {
    let high = state.clone();
    state
        .tasks
        .spawn(HIGH_FREQUENCY, move |cancel| high_frequency_loop(high, cancel));

    if record.auto_benchmarks {
        let low = state.clone();
        state
            .tasks
            .spawn(LOW_FREQUENCY, move |cancel| low_frequency_loop(low, cancel));
    }
}

/// Sample the router's radio state while the session is active.
async fn high_frequency_loop(state: Arc<AgentState>, mut cancel: watch::Receiver<bool>) {
    tracing::info!("high-frequency sampling loop started");
    loop {
        if *cancel.borrow() {
            break;
        }
        let Some(record) = state.sessions.state() else {
            break;
        };

        sample_once(&state, &record).await;

        tokio::select! {
            _ = tokio::time::sleep(state.config.polling.interval()) => {}
            changed = cancel.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!("high-frequency sampling loop stopped");
}

/// One sampling cycle: fetch, enrich with a sensor fix, forward.
///
/// A failed fetch is logged inside ModemSession and skipped here — the
/// loop never terminates because of a transient failure.
async fn sample_once(state: &AgentState, record: &SessionRecord) {
    let Some(status) = state.modem.radio_status().await else {
        return;
    };
    if status.is_empty() {
        tracing::debug!("radio status empty, skipping sample");
        return;
    }

    let mut tags = vec![
        ("session_id".to_string(), record.session_id.clone()),
        ("iccid".to_string(), record.iccid.clone()),
        ("device".to_string(), state.device_id.clone()),
    ];
    tags.extend(status.tags());

    let mut fields = status.fields();
    if let Some(ref sensors) = state.sensors {
        if let Some(fix) = sensors.read().await {
            fields.extend(fix.fields());
        }
    }

    state.sink.write("state_metrics", &tags, &fields).await;
}

/// Run the benchmark suite on a fixed cadence while the session is active.
async fn low_frequency_loop(state: Arc<AgentState>, mut cancel: watch::Receiver<bool>) {
    tracing::info!(
        interval_s = state.config.benchmark.interval_s,
        "benchmark loop started"
    );
    loop {
        if *cancel.borrow() {
            break;
        }
        let Some(record) = state.sessions.state() else {
            break;
        };

        // Skip the cycle when a manual run holds the lock — never queue.
        match state.sessions.try_begin_benchmark() {
            Some(_guard) => bench::run_suite(&state, &record).await,
            None => tracing::info!("benchmark already in progress, skipping this cycle"),
        }

        tokio::select! {
            _ = tokio::time::sleep(state.config.benchmark.interval()) => {}
            changed = cancel.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!("benchmark loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn cancel_all_with_empty_registry_is_a_noop() {
        let orchestrator = TaskOrchestrator::new();
        orchestrator.cancel_all();
        orchestrator.cancel_all();
        assert_eq!(orchestrator.task_count(), 0);
    }

    #[tokio::test]
    async fn cancel_all_signals_and_clears() {
        let orchestrator = TaskOrchestrator::new();
        let stopped = Arc::new(AtomicBool::new(false));

        let flag = stopped.clone();
        orchestrator.spawn("worker", move |mut cancel| async move {
            // Cooperative loop: only observes cancellation at the boundary.
            loop {
                if *cancel.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                    _ = cancel.changed() => {}
                }
            }
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(orchestrator.task_count(), 1);

        orchestrator.cancel_all();
        assert_eq!(orchestrator.task_count(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn spawn_replaces_task_with_same_name() {
        let orchestrator = TaskOrchestrator::new();
        orchestrator.spawn("worker", |_cancel| async {});
        orchestrator.spawn("worker", |_cancel| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        assert_eq!(orchestrator.task_count(), 1);
        orchestrator.shutdown().await;
        assert_eq!(orchestrator.task_count(), 0);
    }
}
