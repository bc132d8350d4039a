//! Mock TTS Engine for Testing
//!
//! Records all spoken text for verification.

use anyhow::Result;
use async_trait::async_trait;
use cabin_voice::tts::{SharedEngine, TtsEngine};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Mock TTS engine that records spoken text
#[derive(Debug)]
pub struct MockTts {
    /// All text that was "spoken"
    pub spoken: Arc<Mutex<Vec<String>>>,
    /// Simulate failure on next speak
    pub should_fail: Arc<Mutex<bool>>,
}

impl MockTts {
    pub fn new() -> Self {
        Self {
            spoken: Arc::new(Mutex::new(Vec::new())),
            should_fail: Arc::new(Mutex::new(false)),
        }
    }

    /// Factory handing this engine to the feedback queue
    pub fn factory(self: &Arc<Self>) -> Arc<SharedEngine> {
        let engine: Arc<dyn TtsEngine> = self.clone();
        Arc::new(SharedEngine(engine))
    }

    /// Get all spoken phrases
    pub fn get_spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    /// Check if a phrase was spoken
    pub fn was_spoken(&self, text: &str) -> bool {
        self.spoken.lock().unwrap().iter().any(|s| s.contains(text))
    }

    /// Poll until `text` has been spoken or the timeout passes
    pub fn wait_for(&self, text: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.was_spoken(text) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.was_spoken(text)
    }
}

impl Default for MockTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsEngine for MockTts {
    async fn speak(&self, text: &str) -> Result<()> {
        if *self.should_fail.lock().unwrap() {
            return Err(anyhow::anyhow!("Mock TTS failure"));
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_tts_records_speech() {
        let mock = MockTts::new();
        tokio_test::block_on(async {
            mock.speak("hello").await.unwrap();
            mock.speak("world").await.unwrap();
        });

        assert!(mock.was_spoken("hello"));
        assert!(mock.was_spoken("world"));
        assert_eq!(mock.get_spoken().len(), 2);
    }

    #[test]
    fn test_mock_tts_failure() {
        let mock = MockTts::new();
        *mock.should_fail.lock().unwrap() = true;
        assert!(tokio_test::block_on(mock.speak("hello")).is_err());
        assert!(mock.get_spoken().is_empty());
    }
}
