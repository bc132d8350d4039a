//! Spoken feedback queue
//!
//! A single dedicated thread owns the TTS engine and plays phrases one at a
//! time, in the order they were queued, regardless of which thread queued
//! them. Callers never block on playback.

use crate::commands::Phrases;
use crate::core::clock::{Scheduler, TimerHandle};
use crate::core::signals::EngineSignals;
use crate::error::VoiceError;
use crate::tts::{TtsEngine, TtsFactory};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Commands sent to the feedback thread
enum FeedbackCommand {
    Speak { text: String, epoch: u64 },
    Shutdown,
}

#[derive(Debug, Default)]
struct WorkerState {
    pending: AtomicUsize,
    speaking: AtomicBool,
    /// Bumped by `stop_all`; queued phrases from older epochs are discarded
    epoch: AtomicU64,
}

impl WorkerState {
    fn take_pending(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Thread-safe handle to the feedback thread
pub struct FeedbackQueue {
    factory: Arc<dyn TtsFactory>,
    sender: Mutex<Option<mpsc::Sender<FeedbackCommand>>>,
    state: Arc<WorkerState>,
}

impl std::fmt::Debug for FeedbackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackQueue")
            .field("pending", &self.queue_len())
            .field("speaking", &self.state.speaking.load(Ordering::SeqCst))
            .finish()
    }
}

impl FeedbackQueue {
    /// The worker thread starts on the first phrase
    pub fn new(factory: Arc<dyn TtsFactory>) -> Self {
        Self {
            factory,
            sender: Mutex::new(None),
            state: Arc::new(WorkerState::default()),
        }
    }

    /// Queue a phrase. Empty text is ignored. Returns whether it was queued.
    pub fn speak(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        let Ok(mut guard) = self.sender.lock() else {
            error!("❌ Feedback queue lock poisoned, dropping '{}'", text);
            return false;
        };

        let epoch = self.state.epoch.load(Ordering::SeqCst);
        self.state.pending.fetch_add(1, Ordering::SeqCst);

        if let Some(sender) = guard.as_ref() {
            let command = FeedbackCommand::Speak {
                text: text.to_string(),
                epoch,
            };
            match sender.send(command) {
                Ok(()) => {
                    debug!("🗣️ Queued feedback: '{}'", text);
                    return true;
                }
                Err(_) => {
                    warn!("⚠️ Feedback thread gone, restarting it");
                    *guard = None;
                }
            }
        }

        match self.spawn_worker() {
            Ok(sender) => {
                let queued = sender
                    .send(FeedbackCommand::Speak {
                        text: text.to_string(),
                        epoch,
                    })
                    .is_ok();
                *guard = Some(sender);
                if !queued {
                    self.state.take_pending();
                }
                queued
            }
            Err(e) => {
                error!("❌ Failed to start feedback thread: {}", e);
                self.state.take_pending();
                false
            }
        }
    }

    fn spawn_worker(&self) -> std::io::Result<mpsc::Sender<FeedbackCommand>> {
        let (sender, receiver) = mpsc::channel::<FeedbackCommand>();
        let factory = self.factory.clone();
        let state = self.state.clone();

        thread::Builder::new()
            .name("feedback".to_string())
            .spawn(move || Self::feedback_thread(receiver, factory, state))?;

        Ok(sender)
    }

    fn feedback_thread(
        receiver: mpsc::Receiver<FeedbackCommand>,
        factory: Arc<dyn TtsFactory>,
        state: Arc<WorkerState>,
    ) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!("❌ Failed to build feedback runtime: {}", e);
                return;
            }
        };

        let mut engine: Option<Arc<dyn TtsEngine>> = None;
        info!("🔊 Feedback thread started");

        while let Ok(command) = receiver.recv() {
            match command {
                FeedbackCommand::Shutdown => break,
                FeedbackCommand::Speak { text, epoch } => {
                    if epoch != state.epoch.load(Ordering::SeqCst) {
                        debug!("Discarding flushed phrase: '{}'", text);
                        continue;
                    }
                    state.speaking.store(true, Ordering::SeqCst);
                    state.take_pending();
                    runtime.block_on(Self::play(factory.as_ref(), &mut engine, &text));
                    state.speaking.store(false, Ordering::SeqCst);
                }
            }
        }

        info!("🔇 Feedback thread stopped");
    }

    async fn play(factory: &dyn TtsFactory, engine: &mut Option<Arc<dyn TtsEngine>>, text: &str) {
        if engine.is_none() {
            match factory.create().await {
                Ok(created) => *engine = Some(created),
                Err(e) => {
                    error!("❌ TTS unavailable, dropping '{}': {}", text, e);
                    return;
                }
            }
        }

        let Some(tts) = engine.as_ref() else {
            return;
        };

        info!("📢 Speaking: '{}'", text);
        let started = Instant::now();
        if let Err(e) = tts.speak(text).await {
            let err = VoiceError::Playback(format!("{:#}", e));
            warn!("⚠️ TTS '{}' failed, rebuilding on next phrase: {}", tts.name(), err);
            *engine = None;
        } else {
            debug!("Playback took {:.2}s", started.elapsed().as_secs_f64());
        }
    }

    /// Speaking now, or phrases still waiting
    pub fn is_busy(&self) -> bool {
        self.state.speaking.load(Ordering::SeqCst) || self.queue_len() > 0
    }

    pub fn queue_len(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Poll until idle. Returns false if still busy at the deadline.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    /// Discard everything queued and let the worker exit after the current
    /// phrase. A later `speak` starts a fresh worker.
    pub fn stop_all(&self) {
        // Held across the epoch bump so no `speak` straddles it
        let guard = self.sender.lock();
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.pending.store(0, Ordering::SeqCst);

        if let Ok(mut guard) = guard {
            if let Some(sender) = guard.take() {
                let _ = sender.send(FeedbackCommand::Shutdown);
                info!("🛑 Feedback queue flushed");
            }
        }
    }
}

impl Drop for FeedbackQueue {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sender.lock() {
            if let Some(sender) = guard.take() {
                let _ = sender.send(FeedbackCommand::Shutdown);
            }
        }
    }
}

/// Two-phase spoken lifecycle of a command: the started phrase right away,
/// the completed phrase after a delay on the scheduler
#[derive(Clone)]
pub struct Announcer {
    queue: Arc<FeedbackQueue>,
    scheduler: Arc<dyn Scheduler>,
    signals: Arc<EngineSignals>,
    completion_delay: Duration,
}

impl Announcer {
    pub fn new(
        queue: Arc<FeedbackQueue>,
        scheduler: Arc<dyn Scheduler>,
        signals: Arc<EngineSignals>,
        completion_delay: Duration,
    ) -> Self {
        Self {
            queue,
            scheduler,
            signals,
            completion_delay,
        }
    }

    pub fn started(&self, phrases: &Phrases) {
        if phrases.announce {
            self.queue.speak(&phrases.started);
        }
    }

    /// Skipped if the engine has stopped by the time the delay elapses
    pub fn completed(&self, phrases: &Phrases) -> Option<TimerHandle> {
        if !phrases.announce {
            return None;
        }

        let queue = self.queue.clone();
        let signals = self.signals.clone();
        let text = phrases.completed.clone();
        Some(self.scheduler.schedule(
            self.completion_delay,
            Box::new(move || {
                if signals.is_running() {
                    queue.speak(&text);
                } else {
                    debug!("Engine stopped, completion phrase skipped: '{}'", text);
                }
            }),
        ))
    }

    pub fn say(&self, text: &str) {
        self.queue.speak(text);
    }

    pub fn queue(&self) -> &Arc<FeedbackQueue> {
        &self.queue
    }
}
