//! Navigation destination collection
//!
//! Drivers often say the intent and the destination as separate utterances
//! ("导航到" ... "天津站"). A trigger opens a short collection window; every
//! utterance heard while it is open is normalized and appended, and when the timer
//! fires the joined text is mined for a destination.

use crate::core::clock::TimerHandle;
use regex::Regex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Fallback split points, tried in order when no capture pattern matches
const SPLIT_KEYWORDS: [&str; 7] = ["导航到", "导航", "去", "到", "前往", "我要去", "出发去"];

/// Particles trailing a spoken destination
const FILLER: [char; 6] = ['了', '吧', '呢', '啊', '。', '，'];

/// Connectives the looser capture patterns leave at the front
const LEADING_CONNECTIVES: [char; 2] = ['到', '去'];

#[derive(Debug)]
struct CollectionWindow {
    generation: u64,
    started_at: Instant,
    utterances: Vec<String>,
    timer: Option<TimerHandle>,
}

#[derive(Debug)]
pub struct NavigationCollector {
    wait: Duration,
    window: Option<CollectionWindow>,
    next_generation: u64,
}

impl NavigationCollector {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            window: None,
            next_generation: 1,
        }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn is_active(&self) -> bool {
        self.window.is_some()
    }

    /// Open a window seeded with the trigger utterance. Any previous window is
    /// cancelled. Returns the generation the timer must present on resolution.
    pub fn begin(&mut self, trigger_text: &str, now: Instant) -> u64 {
        self.cancel();

        let generation = self.next_generation;
        self.next_generation += 1;
        self.window = Some(CollectionWindow {
            generation,
            started_at: now,
            utterances: vec![trigger_text.to_string()],
            timer: None,
        });
        info!(
            "🧭 Collecting destination for {:.1}s: '{}'",
            self.wait.as_secs_f64(),
            trigger_text
        );
        generation
    }

    pub fn attach_timer(&mut self, generation: u64, timer: TimerHandle) {
        match self.window.as_mut() {
            Some(window) if window.generation == generation => window.timer = Some(timer),
            _ => timer.cancel(),
        }
    }

    pub fn append(&mut self, text: &str) {
        if let Some(window) = self.window.as_mut() {
            window.utterances.push(text.to_string());
            debug!(
                "📝 Collected navigation fragment #{}: '{}'",
                window.utterances.len(),
                text
            );
        }
    }

    pub fn collected(&self) -> usize {
        self.window.as_ref().map_or(0, |w| w.utterances.len())
    }

    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.window
            .as_ref()
            .map(|w| now.saturating_duration_since(w.started_at))
    }

    /// Close the window if `generation` is still current, returning what was
    /// collected. A stale timer gets `None`.
    pub fn take(&mut self, generation: u64) -> Option<Vec<String>> {
        if self.window.as_ref()?.generation != generation {
            debug!("Stale navigation timer (generation {}) ignored", generation);
            return None;
        }
        let window = self.window.take()?;
        if let Some(timer) = window.timer {
            timer.cancel();
        }
        Some(window.utterances)
    }

    /// Drop any open window and its timer
    pub fn cancel(&mut self) {
        if let Some(window) = self.window.take() {
            if let Some(timer) = window.timer {
                timer.cancel();
            }
            debug!(
                "🧭 Navigation window {} cancelled with {} fragment(s)",
                window.generation,
                window.utterances.len()
            );
        }
    }
}

/// Pull a destination out of normalized, joined navigation text
pub fn extract_destination(text: &str, patterns: &[Regex]) -> Option<String> {
    for pattern in patterns {
        let captured = pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| clean_destination(m.as_str()));
        if let Some(destination) = captured.filter(|d| !d.is_empty()) {
            debug!("🎯 Destination via '{}': {}", pattern.as_str(), destination);
            return Some(destination);
        }
    }

    for keyword in SPLIT_KEYWORDS {
        if let Some((_, rest)) = text.split_once(keyword) {
            let destination = clean_destination(rest);
            if !destination.is_empty() {
                debug!("🎯 Destination after '{}': {}", keyword, destination);
                return Some(destination);
            }
        }
    }

    None
}

fn clean_destination(raw: &str) -> String {
    raw.trim()
        .trim_start_matches(|c: char| LEADING_CONNECTIVES.contains(&c) || c.is_whitespace())
        .trim_end_matches(|c: char| FILLER.contains(&c) || c.is_whitespace())
        .to_string()
}

/// Canonical command text for a resolved destination
pub fn navigation_text(destination: &str) -> String {
    format!("导航到{}", destination)
}
