//! Duplicate and cooldown filter for recognized commands

use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupVerdict {
    Accept,
    /// Same text as the last accepted command
    Repeat,
    /// Another command was accepted too recently
    CoolingDown(Duration),
}

#[derive(Debug)]
pub struct Deduplicator {
    cooldown: Duration,
    last_text: String,
    last_command_at: Option<Instant>,
}

impl Deduplicator {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_text: String::new(),
            last_command_at: None,
        }
    }

    /// Navigation collection bypasses this filter entirely
    pub fn check(&self, text: &str, now: Instant, navigation_active: bool) -> DedupVerdict {
        if navigation_active {
            return DedupVerdict::Accept;
        }

        if !self.last_text.is_empty() && text == self.last_text {
            debug!("🔄 Duplicate text ignored: '{}'", text);
            return DedupVerdict::Repeat;
        }

        if let Some(last) = self.last_command_at {
            let since = now.saturating_duration_since(last);
            if since < self.cooldown {
                debug!(
                    "⏰ Cooling down ({:.1}s < {:.1}s), ignored: '{}'",
                    since.as_secs_f64(),
                    self.cooldown.as_secs_f64(),
                    text
                );
                return DedupVerdict::CoolingDown(self.cooldown - since);
            }
        }

        DedupVerdict::Accept
    }

    pub fn is_duplicate(&self, text: &str, now: Instant, navigation_active: bool) -> bool {
        self.check(text, now, navigation_active) != DedupVerdict::Accept
    }

    /// Record an accepted command. Must happen before the command callback runs.
    pub fn commit(&mut self, text: &str, now: Instant) {
        self.last_text = text.to_string();
        self.last_command_at = Some(now);
    }

    /// Forget the last text between cycles; the cooldown clock keeps running
    pub fn reset(&mut self) {
        self.last_text.clear();
    }

    pub fn last_command_at(&self) -> Option<Instant> {
        self.last_command_at
    }
}
