#![allow(dead_code)]

pub mod mock_asr;
pub mod mock_audio;
pub mod mock_tts;

use anyhow::Result;
use cabin_voice::commands::CommandTable;
use cabin_voice::core::clock::{ManualClock, ManualScheduler};
use cabin_voice::core::signals::EngineSignals;
use cabin_voice::engine::{CommandSink, HandlerSettings, ResultHandler};
use cabin_voice::feedback::{Announcer, FeedbackQueue};
use mock_tts::MockTts;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const COMPLETION_DELAY: Duration = Duration::from_millis(1500);

/// Command sink that remembers every call and can be told to fail or panic
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub calls: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
    pub panic: AtomicBool,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tags(&self) -> Vec<String> {
        self.calls().into_iter().map(|(tag, _)| tag).collect()
    }
}

impl CommandSink for RecordingSink {
    fn on_command(&self, tag: &str, text: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((tag.to_string(), text.to_string()));
        if self.panic.load(Ordering::SeqCst) {
            panic!("vehicle bus driver crashed on {}", tag);
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("vehicle bus unavailable");
        }
        Ok(())
    }
}

/// A result handler wired to manual time, a mock TTS and a recording sink
pub struct Harness {
    pub scheduler: Arc<ManualScheduler>,
    pub signals: Arc<EngineSignals>,
    pub tts: Arc<MockTts>,
    pub feedback: Arc<FeedbackQueue>,
    pub sink: Arc<RecordingSink>,
    pub handler: Arc<ResultHandler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(HandlerSettings::default())
    }

    pub fn with_settings(settings: HandlerSettings) -> Self {
        Self::with_table(settings, CommandTable::default())
    }

    pub fn with_table(settings: HandlerSettings, table: CommandTable) -> Self {
        let clock = Arc::new(ManualClock::new());
        let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
        let signals = EngineSignals::new();
        let tts = Arc::new(MockTts::new());
        let feedback = Arc::new(FeedbackQueue::new(tts.factory()));
        let announcer = Announcer::new(
            feedback.clone(),
            scheduler.clone(),
            signals.clone(),
            COMPLETION_DELAY,
        );
        let sink = Arc::new(RecordingSink::default());
        let handler = ResultHandler::new(
            settings,
            table,
            announcer,
            sink.clone(),
            signals.clone(),
            clock,
            scheduler.clone(),
        );

        Self {
            scheduler,
            signals,
            tts,
            feedback,
            sink,
            handler,
        }
    }

    /// Move manual time forward, firing due timers
    pub fn advance(&self, by: Duration) {
        self.scheduler.advance(by);
    }

    /// Everything spoken once the feedback queue has drained
    pub fn spoken(&self) -> Vec<String> {
        assert!(self.feedback.wait_idle(Duration::from_secs(5)));
        self.tts.get_spoken()
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
