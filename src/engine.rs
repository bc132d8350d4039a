//! Recognition result handling
//!
//! Every server response funnels through [`ResultHandler`]. It is the single
//! writer of the dedup state, the no-match counter and the navigation window;
//! the listener coroutine and the navigation timer both reach them through one
//! mutex, and the external command callback always runs with that mutex
//! released and the dedup/cooldown state already committed.

use crate::asr::ResponseHandler;
use crate::commands::{CommandMatch, CommandTable, MatchOutcome, NAVIGATION_COMPLETE, NAVIGATION_TRIGGER};
use crate::config::Config;
use crate::core::clock::{Clock, Scheduler};
use crate::core::dedup::Deduplicator;
use crate::core::no_match::NoMatchCounter;
use crate::core::signals::EngineSignals;
use crate::core::text_normalizer::TextNormalizer;
use crate::error::VoiceError;
use crate::feedback::Announcer;
use crate::navigation::{extract_destination, navigation_text, NavigationCollector};
use crate::protocol::ServerResponse;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const COMMAND_ERROR_PROMPT: &str = "指令执行出现错误";
const NAVIGATION_ERROR_PROMPT: &str = "导航指令执行出现错误";
const NO_DESTINATION_PROMPT: &str = "无法识别目的地，请重新说明";

/// Receives every resolved command. Errors are reported to the driver by voice.
pub trait CommandSink: Send + Sync {
    fn on_command(&self, tag: &str, text: &str) -> Result<()>;
}

impl<F> CommandSink for F
where
    F: Fn(&str, &str) -> Result<()> + Send + Sync,
{
    fn on_command(&self, tag: &str, text: &str) -> Result<()> {
        self(tag, text)
    }
}

/// What happened to one recognized utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Ignored,
    /// Appended to the open navigation window
    Collected,
    Duplicate,
    NavigationStarted,
    Dispatched(String),
    CallbackFailed(String),
    NoMatch { restart: bool },
}

#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub max_text_length: usize,
    pub cooldown: Duration,
    pub navigation_wait: Duration,
    pub no_match_enabled: bool,
    pub no_match_threshold: u32,
    pub no_match_window: Duration,
    pub restart_after_command: bool,
}

impl HandlerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_text_length: config.max_text_length,
            cooldown: config.command_cooldown(),
            navigation_wait: config.navigation_wait(),
            no_match_enabled: config.no_match_restart_enabled,
            no_match_threshold: config.max_no_match_count,
            no_match_window: config.no_match_window(),
            restart_after_command: config.restart_after_command,
        }
    }
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Point-in-time view for status reporting
#[derive(Debug, Clone)]
pub struct HandlerSnapshot {
    pub navigation_active: bool,
    pub navigation_fragments: usize,
    pub no_match_count: u32,
    pub no_match_threshold: u32,
    pub no_match_window: Duration,
    pub no_match_enabled: bool,
    pub last_command: Option<(String, DateTime<Local>)>,
    pub last_command_at: Option<Instant>,
    pub commands_dispatched: u64,
}

#[derive(Debug)]
struct HandlerState {
    dedup: Deduplicator,
    no_match: NoMatchCounter,
    navigation: NavigationCollector,
    last_command: Option<(String, DateTime<Local>)>,
    commands_dispatched: u64,
}

/// A command ready for the callback, with the state already committed
struct Dispatch {
    command: CommandMatch,
    error_prompt: &'static str,
    restart: bool,
}

pub struct ResultHandler {
    me: Weak<ResultHandler>,
    state: Mutex<HandlerState>,
    normalizer: TextNormalizer,
    table: CommandTable,
    announcer: Announcer,
    sink: Arc<dyn CommandSink>,
    signals: Arc<EngineSignals>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    restart_after_command: bool,
}

impl ResultHandler {
    pub fn new(
        settings: HandlerSettings,
        table: CommandTable,
        announcer: Announcer,
        sink: Arc<dyn CommandSink>,
        signals: Arc<EngineSignals>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            state: Mutex::new(HandlerState {
                dedup: Deduplicator::new(settings.cooldown),
                no_match: NoMatchCounter::new(
                    settings.no_match_enabled,
                    settings.no_match_threshold,
                    settings.no_match_window,
                ),
                navigation: NavigationCollector::new(settings.navigation_wait),
                last_command: None,
                commands_dispatched: 0,
            }),
            normalizer: TextNormalizer::new(settings.max_text_length),
            table,
            announcer,
            sink,
            signals,
            clock,
            scheduler,
            restart_after_command: settings.restart_after_command,
        })
    }

    fn lock_state(&self) -> Option<MutexGuard<'_, HandlerState>> {
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(e) => {
                error!("❌ Result handler state poisoned: {}", e);
                None
            }
        }
    }

    /// Process one recognized utterance
    pub fn handle_text(&self, raw: &str) -> Handled {
        let raw = raw.trim();
        if raw.is_empty() {
            return Handled::Ignored;
        }
        debug!("🎤 Raw text: '{}'", raw);

        let text = self.normalizer.normalize(raw);
        if text.is_empty() {
            debug!("Text empty after cleanup");
            return Handled::Ignored;
        }
        info!("🎤 Recognized: '{}'", text);

        let now = self.clock.now();
        let Some(mut state) = self.lock_state() else {
            return Handled::Ignored;
        };

        if state.navigation.is_active() {
            state.navigation.append(&text);
            return Handled::Collected;
        }

        if state.dedup.is_duplicate(&text, now, false) {
            return Handled::Duplicate;
        }

        match self.table.classify(&text) {
            MatchOutcome::Trigger(trigger) => {
                state.no_match.reset();
                self.announcer.started(&self.table.phrases(NAVIGATION_TRIGGER));
                self.open_navigation(&mut state, &trigger, now);
                Handled::NavigationStarted
            }
            MatchOutcome::Command(command) => {
                state.dedup.commit(&text, now);
                state.no_match.reset();
                let dispatch = Dispatch {
                    command,
                    error_prompt: COMMAND_ERROR_PROMPT,
                    restart: self.restart_after_command,
                };
                drop(state);
                self.run_callback(dispatch)
            }
            MatchOutcome::NoMatch => {
                let restart = state.no_match.record_failure(&text, now);
                if restart {
                    self.signals.raise_restart();
                }
                Handled::NoMatch { restart }
            }
        }
    }

    fn open_navigation(&self, state: &mut HandlerState, trigger: &str, now: Instant) {
        let generation = state.navigation.begin(trigger, now);
        let me = self.me.clone();
        let timer = self.scheduler.schedule(
            state.navigation.wait(),
            Box::new(move || {
                if let Some(handler) = me.upgrade() {
                    handler.resolve_navigation(generation);
                }
            }),
        );
        state.navigation.attach_timer(generation, timer);
        self.signals.set_navigation_active(true);
    }

    /// Called when the navigation timer fires
    pub fn resolve_navigation(&self, generation: u64) -> Handled {
        let Some(mut state) = self.lock_state() else {
            return Handled::Ignored;
        };
        let Some(fragments) = state.navigation.take(generation) else {
            return Handled::Ignored;
        };
        self.signals.set_navigation_active(false);

        if !self.signals.is_running() {
            info!("🛑 Engine stopping, navigation window discarded");
            return Handled::Ignored;
        }

        let combined = self.normalizer.normalize(fragments.join(" ").trim());
        info!("🔗 Navigation text: '{}'", combined);
        let now = self.clock.now();

        match extract_destination(&combined, self.table.destination_patterns()) {
            Some(destination) => {
                info!("🧭 Destination resolved: {}", destination);
                state.dedup.commit(&combined, now);
                state.no_match.reset();
                let dispatch = Dispatch {
                    command: CommandMatch {
                        tag: NAVIGATION_COMPLETE.to_string(),
                        text: navigation_text(&destination),
                    },
                    error_prompt: NAVIGATION_ERROR_PROMPT,
                    restart: true,
                };
                drop(state);
                self.run_callback(dispatch)
            }
            None => {
                warn!("❌ {}", VoiceError::NoDestination(combined.clone()));
                let restart = state.no_match.record_failure(&combined, now);
                drop(state);
                if restart {
                    self.signals.raise_restart();
                }
                self.announcer.say(NO_DESTINATION_PROMPT);
                Handled::NoMatch { restart }
            }
        }
    }

    fn run_callback(&self, dispatch: Dispatch) -> Handled {
        let Dispatch {
            command,
            error_prompt,
            restart,
        } = dispatch;
        let phrases = self.table.phrases(&command.tag);

        self.announcer.started(&phrases);
        info!("✅ Dispatching {}: '{}'", command.tag, command.text);

        // A panicking callback is treated like a failed one
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.sink.on_command(&command.tag, &command.text)
        }))
        .unwrap_or_else(|_| Err(anyhow!("command callback panicked")));

        match outcome {
            Ok(()) => {
                self.announcer.completed(&phrases);
                if let Some(mut state) = self.lock_state() {
                    state.last_command = Some((command.tag.clone(), Local::now()));
                    state.commands_dispatched += 1;
                }
                if restart {
                    info!("🔄 Command handled, recognition will restart");
                    self.signals.raise_restart();
                }
                Handled::Dispatched(command.tag)
            }
            Err(e) => {
                error!("❌ Command callback failed for {}: {:#}", command.tag, e);
                self.announcer.say(error_prompt);
                Handled::CallbackFailed(command.tag)
            }
        }
    }

    /// Forget the last text and any open window; optionally the failure count too
    pub fn reset_cycle(&self, reset_no_match: bool) {
        if let Some(mut state) = self.lock_state() {
            state.dedup.reset();
            state.navigation.cancel();
            if reset_no_match {
                state.no_match.reset();
            }
        }
        self.signals.set_navigation_active(false);
    }

    /// Cancel the navigation timer so nothing fires after stop
    pub fn stop(&self) {
        if let Some(mut state) = self.lock_state() {
            state.navigation.cancel();
        }
        self.signals.set_navigation_active(false);
    }

    pub fn configure_no_match(&self, enabled: bool, threshold: u32, window: Duration) {
        if let Some(mut state) = self.lock_state() {
            state.no_match.configure(enabled, threshold, window);
        }
    }

    pub fn snapshot(&self) -> Option<HandlerSnapshot> {
        let state = self.lock_state()?;
        Some(HandlerSnapshot {
            navigation_active: state.navigation.is_active(),
            navigation_fragments: state.navigation.collected(),
            no_match_count: state.no_match.count(),
            no_match_threshold: state.no_match.threshold(),
            no_match_window: state.no_match.window(),
            no_match_enabled: state.no_match.enabled(),
            last_command: state.last_command.clone(),
            last_command_at: state.dedup.last_command_at(),
            commands_dispatched: state.commands_dispatched,
        })
    }
}

impl ResponseHandler for ResultHandler {
    fn handle_response(&self, response: &ServerResponse) {
        if let Some(err) = response.error() {
            warn!("❌ Recognition error from service: {}", err);
            return;
        }
        if let Some(text) = response.text() {
            self.handle_text(text);
        }
    }
}
