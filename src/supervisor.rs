//! Restart supervisor
//!
//! Owns the recognition cycle: connect, record and listen until a restart is
//! due or the connection drops, tear everything down, cool off, and go again.
//! Runs on the caller's thread; [`SupervisorHandle`] stops it from anywhere.

use crate::asr::connection::ConnectionManager;
use crate::asr::listener::{self, ResponseHandler};
use crate::asr::sender::{self, SendTiming};
use crate::asr::session::RecognitionSession;
use crate::audio::{AudioFormat, AudioInput, CaptureThread};
use crate::commands::CommandTable;
use crate::config::Config;
use crate::core::clock::{Clock, RuntimeScheduler, Scheduler, SystemClock};
use crate::core::signals::EngineSignals;
use crate::engine::{CommandSink, HandlerSettings, ResultHandler};
use crate::error::{VoiceError, VoiceResult};
use crate::feedback::{Announcer, FeedbackQueue};
use crate::tts::TtsFactory;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Listening,
    Teardown,
    Cooldown,
    Stopped,
}

/// Snapshot of the whole engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub state: SupervisorState,
    pub connected: bool,
    pub recording: bool,
    pub connect_id: Option<String>,
    pub frames_sent: u64,
    pub restart_pending: bool,
    pub navigation_active: bool,
    pub navigation_fragments: usize,
    pub no_match_count: u32,
    pub no_match_threshold: u32,
    pub no_match_window_secs: f64,
    pub no_match_restart_enabled: bool,
    pub feedback_busy: bool,
    pub feedback_queue: usize,
    pub commands_dispatched: u64,
    pub last_command: Option<String>,
    pub last_command_time: Option<String>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SupervisorState>,
    session: Mutex<Option<Arc<RecognitionSession>>>,
    recording: Arc<AtomicBool>,
}

/// Cloneable control surface for a running supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    shared: Arc<Shared>,
    signals: Arc<EngineSignals>,
    handler: Arc<ResultHandler>,
    feedback: Arc<FeedbackQueue>,
}

impl SupervisorHandle {
    /// Stop the engine. Safe from any thread, idempotent.
    pub fn stop(&self) {
        if self.signals.is_running() {
            info!("🛑 Stop requested");
        }
        self.signals.stop();
        self.handler.stop();
        self.feedback.stop_all();
    }

    pub fn is_running(&self) -> bool {
        self.signals.is_running()
    }

    pub fn state(&self) -> SupervisorState {
        self.shared
            .state
            .lock()
            .map(|s| *s)
            .unwrap_or(SupervisorState::Stopped)
    }

    pub fn configure_no_match(&self, enabled: bool, threshold: u32, window: Duration) {
        self.handler.configure_no_match(enabled, threshold, window);
    }

    pub fn status(&self) -> EngineStatus {
        let session = self.shared.session.lock().ok().and_then(|s| s.clone());
        let snapshot = self.handler.snapshot();

        EngineStatus {
            running: self.signals.is_running(),
            state: self.state(),
            connected: session.as_ref().is_some_and(|s| s.is_connected()),
            recording: self.shared.recording.load(Ordering::SeqCst),
            connect_id: session.as_ref().map(|s| s.connect_id().to_string()),
            frames_sent: session.as_ref().map_or(0, |s| s.sequence()),
            restart_pending: self.signals.restart_raised(),
            navigation_active: self.signals.navigation_active(),
            navigation_fragments: snapshot.as_ref().map_or(0, |s| s.navigation_fragments),
            no_match_count: snapshot.as_ref().map_or(0, |s| s.no_match_count),
            no_match_threshold: snapshot.as_ref().map_or(0, |s| s.no_match_threshold),
            no_match_window_secs: snapshot
                .as_ref()
                .map_or(0.0, |s| s.no_match_window.as_secs_f64()),
            no_match_restart_enabled: snapshot.as_ref().is_some_and(|s| s.no_match_enabled),
            feedback_busy: self.feedback.is_busy(),
            feedback_queue: self.feedback.queue_len(),
            commands_dispatched: snapshot.as_ref().map_or(0, |s| s.commands_dispatched),
            last_command: snapshot
                .as_ref()
                .and_then(|s| s.last_command.as_ref().map(|(tag, _)| tag.clone())),
            last_command_time: snapshot.as_ref().and_then(|s| {
                s.last_command
                    .as_ref()
                    .map(|(_, at)| at.format("%Y-%m-%d %H:%M:%S").to_string())
            }),
        }
    }
}

pub struct Supervisor {
    config: Arc<Config>,
    shared: Arc<Shared>,
    signals: Arc<EngineSignals>,
    handler: Arc<ResultHandler>,
    feedback: Arc<FeedbackQueue>,
    input: Arc<dyn AudioInput>,
    connection: ConnectionManager,
    capture: Option<CaptureThread>,
}

impl Supervisor {
    /// Wall-clock engine with a background timer thread
    pub fn new(
        config: Config,
        sink: Arc<dyn CommandSink>,
        tts: Arc<dyn TtsFactory>,
        input: Arc<dyn AudioInput>,
    ) -> VoiceResult<Self> {
        let scheduler = Arc::new(RuntimeScheduler::new()?);
        Ok(Self::with_clock(
            config,
            sink,
            tts,
            input,
            Arc::new(SystemClock),
            scheduler,
        ))
    }

    pub fn with_clock(
        config: Config,
        sink: Arc<dyn CommandSink>,
        tts: Arc<dyn TtsFactory>,
        input: Arc<dyn AudioInput>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let config = Arc::new(config);
        let signals = EngineSignals::new();
        let feedback = Arc::new(FeedbackQueue::new(tts));
        let announcer = Announcer::new(
            feedback.clone(),
            scheduler.clone(),
            signals.clone(),
            config.completion_delay(),
        );

        let mut table = CommandTable::default();
        if !config.custom_commands.is_empty() {
            info!("📋 Adding {} custom command(s)", config.custom_commands.len());
            table.extend(config.custom_commands.clone());
        }

        let handler = ResultHandler::new(
            HandlerSettings::from_config(&config),
            table,
            announcer,
            sink,
            signals.clone(),
            clock,
            scheduler,
        );

        Self {
            connection: ConnectionManager::new(config.clone()),
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(SupervisorState::Disconnected),
                session: Mutex::new(None),
                recording: Arc::new(AtomicBool::new(false)),
            }),
            signals,
            handler,
            feedback,
            input,
            capture: None,
        }
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            shared: self.shared.clone(),
            signals: self.signals.clone(),
            handler: self.handler.clone(),
            feedback: self.feedback.clone(),
        }
    }

    pub fn handler(&self) -> &Arc<ResultHandler> {
        &self.handler
    }

    fn set_state(&self, state: SupervisorState) {
        if let Ok(mut current) = self.shared.state.lock() {
            if *current != state {
                debug!("Supervisor {:?} -> {:?}", *current, state);
                *current = state;
            }
        }
    }

    fn publish_session(&self, session: Option<Arc<RecognitionSession>>) {
        if let Ok(mut slot) = self.shared.session.lock() {
            *slot = session;
        }
    }

    /// Block until stopped
    pub fn run(&mut self) {
        info!("🚀 Voice recognition started");
        let mut reset_no_match = false;

        while self.signals.is_running() {
            self.handler.reset_cycle(reset_no_match);
            self.signals.clear_restart();
            reset_no_match = false;

            self.set_state(SupervisorState::Connecting);
            if let Err(e) = self.start_cycle() {
                warn!("⚠️ Could not start recognition: {}", e);
                self.teardown();
                self.set_state(SupervisorState::Disconnected);
                info!(
                    "⏳ Reconnecting in {:.1}s",
                    self.config.reconnect_delay().as_secs_f64()
                );
                self.signals.pause(self.config.reconnect_delay());
                continue;
            }

            self.set_state(SupervisorState::Listening);
            let restart = self.listen_until_interrupted();
            if !self.signals.is_running() {
                break;
            }

            self.set_state(SupervisorState::Teardown);
            self.teardown();

            if restart {
                self.set_state(SupervisorState::Cooldown);
                self.cool_down();
                reset_no_match = self.config.reset_no_match_on_restart;
            } else {
                warn!(
                    "🔌 Connection lost, retrying in {:.1}s",
                    self.config.disconnect_retry().as_secs_f64()
                );
                self.set_state(SupervisorState::Disconnected);
                self.signals.pause(self.config.disconnect_retry());
            }
        }

        self.shutdown();
    }

    fn start_cycle(&mut self) -> VoiceResult<()> {
        let session = self.connection.connect()?;
        self.publish_session(Some(session.clone()));
        self.start_recording(session)
    }

    fn start_recording(&mut self, session: Arc<RecognitionSession>) -> VoiceResult<()> {
        let not_ready = || VoiceError::Connection("connection not ready for recording".to_string());
        let writer = self.connection.writer().ok_or_else(not_ready)?;
        let reader = self.connection.take_reader().ok_or_else(not_ready)?;

        let (frames_tx, frames_rx) =
            tokio::sync::mpsc::channel(self.config.audio_queue_capacity.max(1));
        self.shared.recording.store(true, Ordering::SeqCst);

        let handler: Arc<dyn ResponseHandler> = self.handler.clone();
        self.connection
            .spawn(listener::listen(
                reader,
                session.clone(),
                handler,
                self.signals.clone(),
                self.config.queue_poll(),
            ))
            .ok_or_else(not_ready)?;

        self.connection
            .spawn(sender::stream_audio(
                frames_rx,
                writer,
                session,
                self.signals.clone(),
                self.shared.recording.clone(),
                SendTiming {
                    poll: self.config.queue_poll(),
                    pacing: self.config.send_pacing(),
                },
            ))
            .ok_or_else(not_ready)?;

        self.capture = Some(CaptureThread::spawn(
            self.input.clone(),
            AudioFormat::from_config(&self.config),
            frames_tx,
            self.shared.recording.clone(),
            self.signals.clone(),
        )?);

        info!("🎙️ Recording and listening");
        Ok(())
    }

    /// Returns true when a restart is due, false on disconnect or stop
    fn listen_until_interrupted(&self) -> bool {
        loop {
            if !self.signals.is_running() {
                return false;
            }
            if !self.connection.is_connected() {
                return self.signals.restart_due();
            }
            if self.signals.wait_restart(self.config.supervisor_poll()) {
                info!("🔄 Restart due, recycling recognition session");
                return true;
            }
        }
    }

    /// Stop recording, release the device, close the socket
    fn teardown(&mut self) {
        self.shared.recording.store(false, Ordering::SeqCst);
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.connection.disconnect();
        self.publish_session(None);
    }

    fn cool_down(&self) {
        let delay = self.config.restart_delay();
        info!("⏳ Restarting recognition in {:.1}s", delay.as_secs_f64());
        if !self.signals.pause(delay) {
            return;
        }

        let poll = self.config.supervisor_poll();
        for attempt in 1..=self.config.feedback_drain_retries {
            if !self.feedback.is_busy() {
                break;
            }
            debug!("Waiting for feedback to finish ({})", attempt);
            if !self.signals.pause(poll) {
                return;
            }
        }
    }

    fn shutdown(&mut self) {
        self.handler.stop();
        self.feedback.stop_all();
        self.teardown();
        self.set_state(SupervisorState::Stopped);
        info!("👋 Voice recognition stopped");
    }
}
