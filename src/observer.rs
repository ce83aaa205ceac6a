//! Observer trait for pipeline stage, attempt, and rollback events.
//!
//! Inject a [`SharedObserver`] via
//! [`crate::config::PublisherConfigBuilder::observer`] to receive events as a
//! run progresses. Per-attempt failures are never surfaced through the
//! returned error, so this is the only structured way to see them besides
//! the log.
//!
//! # Example
//!
//! ```rust
//! use contract_forms::{PipelineObserver, PublisherConfig};
//! use std::sync::{Arc, atomic::{AtomicU32, Ordering}};
//!
//! struct AttemptCounter(AtomicU32);
//!
//! impl PipelineObserver for AttemptCounter {
//!     fn on_attempt_start(&self, attempt: u32, max_attempts: u32) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("attempt {attempt}/{max_attempts}");
//!     }
//! }
//!
//! let config = PublisherConfig::builder()
//!     .observer(Arc::new(AttemptCounter(AtomicU32::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Stage;
use crate::gateway::FormId;
use std::sync::Arc;

/// Called by the orchestrator as a run progresses.
///
/// All methods default to no-ops. Implementations must be `Send + Sync`
/// because uploads within an attempt may run concurrently and one observer
/// is shared by every run of an orchestrator.
pub trait PipelineObserver: Send + Sync {
    /// A run started.
    fn on_run_start(&self, run_id: &str) {
        let _ = run_id;
    }

    /// A stage is about to execute. Remote stages fire once per attempt.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// An attempt of the retry loop started (1-based).
    fn on_attempt_start(&self, attempt: u32, max_attempts: u32) {
        let _ = (attempt, max_attempts);
    }

    /// An attempt failed at `stage`; the loop will retry if budget remains.
    fn on_attempt_failed(&self, attempt: u32, stage: Stage, error: &str) {
        let _ = (attempt, stage, error);
    }

    /// A pending-deletion form was (or failed to be) deleted.
    fn on_rollback(&self, form_id: &FormId, deleted: bool) {
        let _ = (form_id, deleted);
    }

    /// The run finished; `error` is `None` on success.
    fn on_run_complete(&self, run_id: &str, error: Option<&str>) {
        let _ = (run_id, error);
    }
}

/// Observer that ignores every event. Used when none is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// How an observer is held by [`crate::config::PublisherConfig`] and shared
/// across runs.
pub type SharedObserver = Arc<dyn PipelineObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        attempts: AtomicU32,
        failures: Mutex<Vec<(u32, Stage)>>,
        rollbacks: AtomicU32,
    }

    impl PipelineObserver for Recording {
        fn on_attempt_start(&self, _attempt: u32, _max: u32) {
            self.attempts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_attempt_failed(&self, attempt: u32, stage: Stage, _error: &str) {
            self.failures.lock().unwrap().push((attempt, stage));
        }

        fn on_rollback(&self, _form_id: &FormId, deleted: bool) {
            if deleted {
                self.rollbacks.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let o = NoopObserver;
        o.on_run_start("run-1");
        o.on_stage_start(Stage::Render);
        o.on_attempt_start(1, 3);
        o.on_attempt_failed(1, Stage::ItemInsert, "boom");
        o.on_rollback(&FormId::from("f"), true);
        o.on_run_complete("run-1", None);
    }

    #[test]
    fn recording_observer_receives_events() {
        let o = Recording::default();
        o.on_attempt_start(1, 3);
        o.on_attempt_failed(1, Stage::AssetUpload, "quota");
        o.on_attempt_start(2, 3);
        o.on_rollback(&FormId::from("f1"), true);
        o.on_rollback(&FormId::from("f2"), false);

        assert_eq!(o.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(*o.failures.lock().unwrap(), vec![(1, Stage::AssetUpload)]);
        assert_eq!(o.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_observer_works() {
        let o: SharedObserver = Arc::new(NoopObserver);
        o.on_stage_start(Stage::Relocate);
    }
}
