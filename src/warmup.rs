//! Background load-and-warm of the local explanation model.
//!
//! One thread loads the model, runs a throwaway explanation to pay any lazy
//! initialization up front, and publishes the result. Callers block on a
//! condition variable with a bounded wait instead of polling.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use explainer_types::{Artifact, WarmupState};
use log::{error, info, warn};

use crate::error::TierError;
use crate::local_model::LocalExplainer;

/// The dummy record explained once after loading.
pub fn warmup_record() -> Artifact {
    let test = || Some("Test".to_string());
    Artifact {
        id: "warmup".to_string(),
        name: Some("Warmup".to_string()),
        category: test(),
        origin: test(),
        era: test(),
        materials: test(),
        function: test(),
        symbolism: test(),
        notes: test(),
        image: None,
    }
}

struct Slot {
    state: WarmupState,
    model: Option<Arc<dyn LocalExplainer>>,
    failure: Option<String>,
}

struct Shared {
    slot: Mutex<Slot>,
    ready: Condvar,
}

/// Owns the warmup state. The state is set once and never reverts; a failed
/// warmup is not retried.
#[derive(Clone)]
pub struct BackgroundWarmupController {
    shared: Arc<Shared>,
}

impl BackgroundWarmupController {
    fn with_state(state: WarmupState) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    state,
                    model: None,
                    failure: None,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// A controller with no local model; `explain` skips this tier.
    pub fn disabled() -> Self {
        Self::with_state(WarmupState::NotStarted)
    }

    /// Start loading on a background thread and return immediately.
    pub fn start<F>(loader: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn LocalExplainer>, TierError> + Send + 'static,
    {
        let controller = Self::with_state(WarmupState::Loading);
        let shared = Arc::clone(&controller.shared);

        let spawned = thread::Builder::new()
            .name("local-model-warmup".to_string())
            .spawn(move || {
                let started = Instant::now();
                info!("[WARMUP] Loading local model...");
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| load_and_warm(loader)))
                    .unwrap_or_else(|payload| Err(format!("panicked: {}", panic_message(&*payload))));
                match outcome {
                    Ok(model) => {
                        info!(
                            "[WARMUP] Local model loaded and warmed up in {:.2}s",
                            started.elapsed().as_secs_f64()
                        );
                        shared.finish(WarmupState::Ready, Some(model), None);
                    }
                    Err(reason) => {
                        error!("[WARMUP] Local model load failed: {reason}");
                        shared.finish(WarmupState::Failed, None, Some(reason));
                    }
                }
            });

        if let Err(e) = spawned {
            controller
                .shared
                .finish(WarmupState::Failed, None, Some(format!("failed to start warmup thread: {e}")));
        }
        controller
    }

    pub fn state(&self) -> WarmupState {
        self.shared.lock().state
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.shared.lock().failure.clone()
    }

    /// The warmed model, waiting up to `max` while it is still loading.
    /// Returns `None` at once when warmup is disabled or failed.
    pub fn wait_ready(&self, max: Duration) -> Option<Arc<dyn LocalExplainer>> {
        let slot = self.shared.lock();
        if slot.state == WarmupState::Loading {
            info!("[WARMUP] Local model still loading, waiting up to {max:?}");
        }
        let (slot, timeout) = self
            .shared
            .ready
            .wait_timeout_while(slot, max, |s| s.state == WarmupState::Loading)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if timeout.timed_out() && slot.state == WarmupState::Loading {
            warn!("[WARMUP] Local model not ready after {max:?}");
        }
        slot.model.clone()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn finish(&self, state: WarmupState, model: Option<Arc<dyn LocalExplainer>>, failure: Option<String>) {
        let mut slot = self.lock();
        if slot.state != WarmupState::Loading {
            return;
        }
        slot.state = state;
        slot.model = model;
        slot.failure = failure;
        self.ready.notify_all();
    }
}

fn load_and_warm<F>(loader: F) -> Result<Arc<dyn LocalExplainer>, String>
where
    F: FnOnce() -> Result<Arc<dyn LocalExplainer>, TierError>,
{
    let model = loader().map_err(|e| e.to_string())?;
    model
        .explain(&warmup_record())
        .map_err(|e| format!("warmup inference failed: {e}"))?;
    Ok(model)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: Arc<AtomicUsize>,
    }

    impl LocalExplainer for Echo {
        fn explain(&self, artifact: &Artifact) -> Result<String, TierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("explained {}", artifact.display_name()))
        }
    }

    #[test]
    fn test_wait_returns_model_once_warm() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model_calls = Arc::clone(&calls);
        let controller = BackgroundWarmupController::start(move || {
            thread::sleep(Duration::from_millis(300));
            Ok(Arc::new(Echo { calls: model_calls }) as Arc<dyn LocalExplainer>)
        });
        assert_eq!(controller.state(), WarmupState::Loading);

        let model = controller.wait_ready(Duration::from_secs(5)).unwrap();

        assert_eq!(controller.state(), WarmupState::Ready);
        // The warmup inference ran before the model was published.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.explain(&warmup_record()).unwrap(), "explained Warmup");
    }

    #[test]
    fn test_bounded_wait_gives_up() {
        let controller = BackgroundWarmupController::start(|| {
            thread::sleep(Duration::from_secs(3));
            Err(TierError::LocalModel("too slow".into()))
        });

        let started = Instant::now();
        assert!(controller.wait_ready(Duration::from_millis(100)).is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(controller.state(), WarmupState::Loading);
    }

    #[test]
    fn test_loader_error_is_permanent_failure() {
        let controller =
            BackgroundWarmupController::start(|| Err(TierError::LocalModel("weights missing".into())));

        assert!(controller.wait_ready(Duration::from_secs(5)).is_none());
        assert_eq!(controller.state(), WarmupState::Failed);
        assert!(controller.failure_reason().unwrap().contains("weights missing"));
    }

    #[test]
    fn test_panic_during_load_is_failure() {
        let controller = BackgroundWarmupController::start(|| panic!("corrupt tensor"));

        assert!(controller.wait_ready(Duration::from_secs(5)).is_none());
        assert_eq!(controller.state(), WarmupState::Failed);
        assert!(controller.failure_reason().unwrap().contains("corrupt tensor"));
    }

    #[test]
    fn test_disabled_never_waits() {
        let controller = BackgroundWarmupController::disabled();
        let started = Instant::now();

        assert!(controller.wait_ready(Duration::from_secs(10)).is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(controller.state(), WarmupState::NotStarted);
    }
}
