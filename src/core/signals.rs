//! Shared stop flag, restart signal and navigation-window flag
//!
//! Every loop in the engine (capture thread, sender, listener, supervisor)
//! checks these at each suspension point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
pub struct EngineSignals {
    running: AtomicBool,
    navigation_active: AtomicBool,
    restart: Mutex<bool>,
    wake: Condvar,
}

impl Default for EngineSignals {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(true),
            navigation_active: AtomicBool::new(false),
            restart: Mutex::new(false),
            wake: Condvar::new(),
        }
    }
}

impl EngineSignals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Terminal: wakes every waiter, nothing restarts afterwards
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _guard = self.restart.lock();
        self.wake.notify_all();
    }

    pub fn raise_restart(&self) {
        if let Ok(mut raised) = self.restart.lock() {
            if !*raised {
                debug!("Restart signal raised");
            }
            *raised = true;
        }
        self.wake.notify_all();
    }

    pub fn clear_restart(&self) {
        if let Ok(mut raised) = self.restart.lock() {
            *raised = false;
        }
    }

    pub fn restart_raised(&self) -> bool {
        self.restart.lock().map(|r| *r).unwrap_or(false)
    }

    pub fn set_navigation_active(&self, active: bool) {
        self.navigation_active.store(active, Ordering::SeqCst);
        if !active {
            // A deferred restart may now proceed
            let _guard = self.restart.lock();
            self.wake.notify_all();
        }
    }

    pub fn navigation_active(&self) -> bool {
        self.navigation_active.load(Ordering::SeqCst)
    }

    /// A pending restart only takes effect once no navigation window is open
    pub fn restart_due(&self) -> bool {
        self.restart_raised() && !self.navigation_active()
    }

    /// Loops wind down when stopped or when a restart is due
    pub fn should_wind_down(&self) -> bool {
        !self.is_running() || self.restart_due()
    }

    /// Block until a restart is due, the engine stops, or the timeout passes.
    /// Returns whether a restart is due.
    pub fn wait_restart(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut raised) = self.restart.lock() else {
            return false;
        };

        loop {
            if !self.is_running() {
                return false;
            }
            if *raised && !self.navigation_active() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.wake.wait_timeout(raised, deadline - now) {
                Ok((guard, _)) => raised = guard,
                Err(_) => return false,
            }
        }
    }

    /// Sleep that ends early on stop. Returns whether the engine is still running.
    pub fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let Ok(mut guard) = self.restart.lock() else {
            return self.is_running();
        };

        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.wake.wait_timeout(guard, deadline - now) {
                Ok((g, _)) => guard = g,
                Err(_) => break,
            }
        }
        self.is_running()
    }
}
