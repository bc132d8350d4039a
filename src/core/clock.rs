//! Time source and deferred-task scheduling
//!
//! Everything time-dependent in the engine (cooldowns, the no-match window,
//! the navigation timer, delayed completion phrases) goes through these two
//! traits so tests can drive time by hand.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Monotonic time source
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    elapsed: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += by;
        }
    }

    fn set_elapsed(&self, to: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            if to > *elapsed {
                *elapsed = to;
            }
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or_default()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a scheduled task; cancelling after it ran is a no-op
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
            abort: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Runs tasks after a delay unless they are cancelled first
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

// ── RuntimeScheduler ──────────────────────────────────────────

/// Timers as tokio tasks on a single-threaded runtime of their own
///
/// Each task sleeps, then runs unless cancelled. A task that panics only
/// takes itself down; the runtime and every other timer keep going.
#[derive(Debug)]
pub struct RuntimeScheduler {
    handle: Handle,
    next_id: AtomicU64,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RuntimeScheduler {
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown, stopped) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("timer".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = stopped.await;
                });
                debug!("Timer runtime stopped");
            })?;

        Ok(Self {
            handle,
            next_id: AtomicU64::new(1),
            shutdown: Mutex::new(Some(shutdown)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Stop the runtime; pending timers are dropped without running
    pub fn shutdown(&self) {
        if let Some(shutdown) = self.shutdown.lock().ok().and_then(|mut s| s.take()) {
            let _ = shutdown.send(());
        }
        let Some(timer_thread) = self.thread.lock().ok().and_then(|mut t| t.take()) else {
            return;
        };
        // The last owner may be a timer task itself
        if timer_thread.thread().id() == thread::current().id() {
            return;
        }
        if timer_thread.join().is_err() {
            warn!("⚠️ Timer thread panicked");
        }
    }
}

impl Drop for RuntimeScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Scheduler for RuntimeScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let mut handle = TimerHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let cancelled = handle.cancelled.clone();
        let id = handle.id;

        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !cancelled.load(Ordering::SeqCst) {
                debug!("⏰ Timer {} fired", id);
                task();
            }
        });
        handle.abort = Some(join.abort_handle());
        handle
    }
}

// ── ManualScheduler ───────────────────────────────────────────

struct Scheduled {
    task: Task,
    handle: TimerHandle,
}

/// Scheduler whose tasks only run when the test advances time
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    pending: Mutex<Vec<(Duration, Scheduled)>>,
    next_id: AtomicU64,
}

impl ManualScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            pending: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of tasks still waiting (cancelled ones excluded)
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .map(|p| p.iter().filter(|(_, s)| !s.handle.is_cancelled()).count())
            .unwrap_or(0)
    }

    /// Move the clock forward, running due tasks in deadline order
    pub fn advance(&self, by: Duration) {
        let target = self.clock.elapsed() + by;

        loop {
            let next = {
                let Ok(mut pending) = self.pending.lock() else {
                    return;
                };
                let earliest = pending
                    .iter()
                    .enumerate()
                    .filter(|(_, (due, _))| *due <= target)
                    .min_by_key(|(_, (due, s))| (*due, s.handle.id))
                    .map(|(idx, _)| idx);
                earliest.map(|idx| pending.remove(idx))
            };

            let Some((due, scheduled)) = next else {
                break;
            };
            self.clock.set_elapsed(due);
            if !scheduled.handle.is_cancelled() {
                (scheduled.task)();
            }
        }

        self.clock.set_elapsed(target);
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let due = self.clock.elapsed() + delay;
        if let Ok(mut pending) = self.pending.lock() {
            pending.push((
                due,
                Scheduled {
                    task,
                    handle: handle.clone(),
                },
            ));
        }
        handle
    }
}
