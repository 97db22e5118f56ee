//! Run-state reconciliation.
//!
//! A thread accepts no new message while a run is active, so a user who
//! stopped generation client-side (or double-sent) would hit a hard backend
//! rejection on the next turn. Before each turn the reconciler cancels
//! whatever is still running on the thread and waits, bounded, for the
//! backend to acknowledge. On timeout it fails open: the turn proceeds and
//! the backend's own rejection becomes the error of last resort.

use std::time::Duration;

use async_trait::async_trait;

use sb_domain::config::ReconcilerConfig;
use sb_domain::retry::RetryPolicy;
use sb_domain::Result;

use crate::threads::Run;

/// The slice of the thread API the reconciler needs. A seam so tests drive
/// the state machine without a live backend.
#[async_trait]
pub trait RunControl: Send + Sync {
    async fn list_runs(&self, thread_ref: &str) -> Result<Vec<Run>>;
    async fn cancel_run(&self, thread_ref: &str, run_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct RunReconciler {
    max_wait: Duration,
    poll_interval: Duration,
}

impl RunReconciler {
    pub fn new(cfg: &ReconcilerConfig) -> Self {
        Self {
            max_wait: Duration::from_secs(cfg.max_wait_secs),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms.max(1)),
        }
    }

    /// Bring `thread_ref` to a state that accepts a new message.
    ///
    /// Listing failures propagate (the turn would fail anyway); cancel
    /// failures and poll timeouts do not.
    pub async fn ensure_clean(&self, control: &dyn RunControl, thread_ref: &str) -> Result<()> {
        let active = active_runs(control.list_runs(thread_ref).await?);
        if active.is_empty() {
            return Ok(());
        }

        tracing::info!(
            thread = %thread_ref,
            count = active.len(),
            "active runs found before turn, cancelling"
        );
        for run in &active {
            // The run may finish on its own between listing and cancel, so
            // a failed cancel is logged and the poll decides.
            if let Err(e) = control.cancel_run(thread_ref, &run.id).await {
                tracing::warn!(thread = %thread_ref, run = %run.id, error = %e, "cancel failed");
            }
        }

        let attempts =
            (self.max_wait.as_millis() / self.poll_interval.as_millis().max(1)).max(1) as u32;
        let poll = RetryPolicy::fixed(self.poll_interval, attempts);
        let settled = poll
            .poll_until(|| async {
                match control.list_runs(thread_ref).await {
                    Ok(runs) if runs.iter().all(|r| !r.status.is_active()) => Some(()),
                    // Still busy, or a transient listing failure; keep polling.
                    _ => None,
                }
            })
            .await;

        if settled.is_none() {
            tracing::warn!(
                thread = %thread_ref,
                waited_ms = self.max_wait.as_millis() as u64,
                "runs did not settle in time, proceeding anyway"
            );
        }
        Ok(())
    }
}

fn active_runs(runs: Vec<Run>) -> Vec<Run> {
    runs.into_iter().filter(|r| r.status.is_active()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sb_domain::run::RunStatus;

    /// Scripted backend: each `list_runs` pops the next snapshot; the last
    /// snapshot repeats.
    struct Scripted {
        snapshots: Mutex<Vec<Vec<Run>>>,
        cancelled: Mutex<Vec<String>>,
        list_calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(snapshots: Vec<Vec<Run>>) -> Self {
            Self {
                snapshots: Mutex::new(snapshots),
                cancelled: Mutex::new(Vec::new()),
                list_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl RunControl for Scripted {
        async fn list_runs(&self, _thread_ref: &str) -> Result<Vec<Run>> {
            *self.list_calls.lock() += 1;
            let mut snapshots = self.snapshots.lock();
            if snapshots.len() > 1 {
                Ok(snapshots.remove(0))
            } else {
                Ok(snapshots[0].clone())
            }
        }

        async fn cancel_run(&self, _thread_ref: &str, run_id: &str) -> Result<()> {
            self.cancelled.lock().push(run_id.to_owned());
            Ok(())
        }
    }

    fn run(id: &str, status: RunStatus) -> Run {
        Run {
            id: id.into(),
            status,
            last_error: None,
        }
    }

    fn reconciler(max_wait_secs: u64) -> RunReconciler {
        RunReconciler::new(&ReconcilerConfig {
            max_wait_secs,
            poll_interval_ms: 1,
        })
    }

    #[tokio::test]
    async fn clean_thread_is_a_single_list() {
        let control = Scripted::new(vec![vec![
            run("run_old", RunStatus::Completed),
            run("run_older", RunStatus::Cancelled),
        ]]);

        reconciler(1).ensure_clean(&control, "thread_1").await.unwrap();
        assert_eq!(*control.list_calls.lock(), 1);
        assert!(control.cancelled.lock().is_empty());
    }

    #[tokio::test]
    async fn active_run_is_cancelled_and_awaited() {
        let control = Scripted::new(vec![
            vec![run("run_1", RunStatus::InProgress)],
            vec![run("run_1", RunStatus::InProgress)],
            vec![run("run_1", RunStatus::Cancelled)],
        ]);

        reconciler(1).ensure_clean(&control, "thread_1").await.unwrap();
        assert_eq!(control.cancelled.lock().as_slice(), ["run_1"]);
        // Initial list + two polls.
        assert_eq!(*control.list_calls.lock(), 3);
    }

    #[tokio::test]
    async fn requires_action_counts_as_active() {
        let control = Scripted::new(vec![
            vec![run("run_1", RunStatus::RequiresAction)],
            vec![run("run_1", RunStatus::Expired)],
        ]);

        reconciler(1).ensure_clean(&control, "thread_1").await.unwrap();
        assert_eq!(control.cancelled.lock().as_slice(), ["run_1"]);
    }

    #[tokio::test]
    async fn timeout_fails_open() {
        // Never settles.
        let control = Scripted::new(vec![vec![run("run_stuck", RunStatus::InProgress)]]);

        let out = reconciler(0).ensure_clean(&control, "thread_1").await;
        assert!(out.is_ok());
        assert_eq!(control.cancelled.lock().as_slice(), ["run_stuck"]);
    }
}
