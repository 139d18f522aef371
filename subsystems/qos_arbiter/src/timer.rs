//! # Deferred Timer
//!
//! One-shot deferred execution for the boost session expiry.
//!
//! A [`DeferredTimer`] holds at most one pending task. Arming again replaces
//! the pending task. [`DeferredTimer::cancel_sync`] removes the pending task
//! and, if the task is already running, waits for it to return.
//!
//! - [`ManualTimer`] runs the task only when [`ManualTimer::fire`] is called.
//! - [`ThreadTimer`] (feature `std`) runs it on one dedicated worker thread.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;

use spin::Mutex;

/// Work executed when a deferred timer expires
pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// One-shot deferred executor
pub trait DeferredTimer: Send + Sync {
    /// Run `task` once after `delay`, replacing any pending task
    fn arm(&self, delay: Duration, task: DeferredTask);

    /// Drop the pending task and wait for an in-flight one to finish
    ///
    /// Returns `true` when a pending task was removed. Must not be called
    /// from inside a task of the same timer.
    fn cancel_sync(&self) -> bool;
}

// =============================================================================
// MANUAL TIMER
// =============================================================================

struct PendingTask {
    delay: Duration,
    task: DeferredTask,
}

/// Timer driven by the caller
pub struct ManualTimer {
    pending: Mutex<Option<PendingTask>>,
    running: AtomicBool,
    armed: AtomicU64,
    fired: AtomicU64,
}

impl ManualTimer {
    /// Create an idle timer
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            running: AtomicBool::new(false),
            armed: AtomicU64::new(0),
            fired: AtomicU64::new(0),
        }
    }

    /// Run the pending task now; returns whether there was one
    pub fn fire(&self) -> bool {
        let pending = self.pending.lock().take();
        match pending {
            Some(pending) => {
                self.running.store(true, Ordering::Release);
                (pending.task)();
                self.running.store(false, Ordering::Release);
                self.fired.fetch_add(1, Ordering::Relaxed);
                true
            },
            None => false,
        }
    }

    /// Delay of the pending task
    pub fn pending_delay(&self) -> Option<Duration> {
        self.pending.lock().as_ref().map(|p| p.delay)
    }

    /// Is a task pending?
    pub fn is_armed(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Number of `arm` calls so far
    pub fn arm_count(&self) -> u64 {
        self.armed.load(Ordering::Relaxed)
    }

    /// Number of tasks run so far
    pub fn fire_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }
}

impl core::fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ManualTimer")
            .field("pending", &self.pending_delay())
            .field("armed", &self.arm_count())
            .field("fired", &self.fire_count())
            .finish()
    }
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredTimer for ManualTimer {
    fn arm(&self, delay: Duration, task: DeferredTask) {
        self.armed.fetch_add(1, Ordering::Relaxed);
        *self.pending.lock() = Some(PendingTask { delay, task });
    }

    fn cancel_sync(&self) -> bool {
        let cancelled = self.pending.lock().take().is_some();
        while self.running.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
        cancelled
    }
}

// =============================================================================
// THREAD TIMER
// =============================================================================

#[cfg(feature = "std")]
pub use self::thread::ThreadTimer;

#[cfg(feature = "std")]
mod thread {
    use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
    use std::thread::{self, JoinHandle, ThreadId};
    use std::time::Instant;

    use super::{DeferredTask, DeferredTimer};
    use core::time::Duration;

    #[derive(Default)]
    struct WorkerState {
        pending: Option<(Instant, DeferredTask)>,
        running: bool,
        shutdown: bool,
    }

    #[derive(Default)]
    struct Shared {
        state: Mutex<WorkerState>,
        cond: Condvar,
    }

    impl Shared {
        fn lock(&self) -> MutexGuard<'_, WorkerState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn wait<'a>(&self, guard: MutexGuard<'a, WorkerState>) -> MutexGuard<'a, WorkerState> {
            self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
        }

        fn wait_for<'a>(
            &self,
            guard: MutexGuard<'a, WorkerState>,
            timeout: Duration,
        ) -> MutexGuard<'a, WorkerState> {
            match self.cond.wait_timeout(guard, timeout) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            }
        }
    }

    /// Timer backed by one dedicated worker thread
    pub struct ThreadTimer {
        shared: Arc<Shared>,
        worker: Option<JoinHandle<()>>,
        worker_id: ThreadId,
    }

    impl ThreadTimer {
        /// Spawn the worker thread
        pub fn new() -> std::io::Result<Self> {
            let shared = Arc::new(Shared::default());
            let worker_shared = Arc::clone(&shared);
            let worker = thread::Builder::new()
                .name("qos-boost-timer".into())
                .spawn(move || run(&worker_shared))?;
            let worker_id = worker.thread().id();

            Ok(Self {
                shared,
                worker: Some(worker),
                worker_id,
            })
        }
    }

    fn run(shared: &Shared) {
        let mut state = shared.lock();
        loop {
            if state.shutdown {
                return;
            }
            let deadline = match state.pending.as_ref() {
                Some((deadline, _)) => *deadline,
                None => {
                    state = shared.wait(state);
                    continue;
                },
            };

            let now = Instant::now();
            if now < deadline {
                state = shared.wait_for(state, deadline - now);
                continue;
            }

            let Some((_, task)) = state.pending.take() else {
                continue;
            };
            state.running = true;
            drop(state);

            task();

            state = shared.lock();
            state.running = false;
            shared.cond.notify_all();
        }
    }

    impl core::fmt::Debug for ThreadTimer {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            let state = self.shared.lock();
            f.debug_struct("ThreadTimer")
                .field("pending", &state.pending.is_some())
                .field("running", &state.running)
                .finish()
        }
    }

    impl DeferredTimer for ThreadTimer {
        fn arm(&self, delay: Duration, task: DeferredTask) {
            let mut state = self.shared.lock();
            state.pending = Some((Instant::now() + delay, task));
            self.shared.cond.notify_all();
        }

        fn cancel_sync(&self) -> bool {
            let mut state = self.shared.lock();
            let cancelled = state.pending.take().is_some();
            while state.running {
                state = self.shared.wait(state);
            }
            cancelled
        }
    }

    impl Drop for ThreadTimer {
        fn drop(&mut self) {
            {
                let mut state = self.shared.lock();
                state.shutdown = true;
                state.pending = None;
                self.shared.cond.notify_all();
            }
            // Dropped from inside a task: the worker exits on its own.
            if thread::current().id() == self.worker_id {
                return;
            }
            if let Some(worker) = self.worker.take() {
                if worker.join().is_err() {
                    log::error!("QosArbiter: boost timer worker panicked");
                }
            }
        }
    }
}
