//! Consecutive-failure guard
//!
//! Sustained recognition failures usually mean the streaming session has gone
//! bad; past a threshold the engine tears the session down and reconnects.

use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug)]
pub struct NoMatchCounter {
    enabled: bool,
    threshold: u32,
    window: Duration,
    count: u32,
    last_failure: Option<Instant>,
}

impl NoMatchCounter {
    pub fn new(enabled: bool, threshold: u32, window: Duration) -> Self {
        Self {
            enabled,
            threshold: threshold.max(1),
            window,
            count: 0,
            last_failure: None,
        }
    }

    /// Count one failure. Returns true when a forced restart is required;
    /// the counter has already reset itself in that case.
    pub fn record_failure(&mut self, text: &str, now: Instant) -> bool {
        if let Some(last) = self.last_failure {
            if now.saturating_duration_since(last) > self.window {
                info!(
                    "⏰ No-match window ({}s) elapsed, counter reset",
                    self.window.as_secs()
                );
                self.reset();
            }
        }

        self.count += 1;
        self.last_failure = Some(now);
        info!(
            "❌ No matching command ({}/{}): '{}'",
            self.count, self.threshold, text
        );

        if self.enabled && self.count >= self.threshold {
            warn!(
                "🔄 {} unmatched utterances in a row, forcing recognition restart",
                self.threshold
            );
            self.reset();
            return true;
        }

        false
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.last_failure = None;
    }

    pub fn configure(&mut self, enabled: bool, threshold: u32, window: Duration) {
        info!(
            "🔧 No-match restart: enabled={}, threshold={}, window={}s",
            enabled,
            threshold,
            window.as_secs()
        );
        self.enabled = enabled;
        self.threshold = threshold.max(1);
        self.window = window;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }
}
