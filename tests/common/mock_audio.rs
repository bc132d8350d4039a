//! Mock microphone producing silence at a steady rate

use anyhow::Result;
use cabin_voice::audio::{AudioFormat, AudioInput, FrameSource};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ScriptedInput {
    /// Times the device was opened
    pub opened: Arc<AtomicUsize>,
    /// Frames read across all openings
    pub frames: Arc<AtomicUsize>,
    /// Fail every read after this many frames
    pub fail_after: Option<usize>,
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(frames: usize) -> Self {
        Self {
            fail_after: Some(frames),
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

struct Silence {
    chunk_bytes: usize,
    frames: Arc<AtomicUsize>,
    fail_after: Option<usize>,
}

impl FrameSource for Silence {
    fn read_frame(&mut self) -> Result<Vec<u8>> {
        let n = self.frames.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| n >= limit) {
            anyhow::bail!("microphone unplugged");
        }
        std::thread::sleep(Duration::from_millis(5));
        Ok(vec![0u8; self.chunk_bytes])
    }
}

impl AudioInput for ScriptedInput {
    fn open(&self, format: &AudioFormat) -> Result<Box<dyn FrameSource>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Silence {
            chunk_bytes: format.chunk_bytes,
            frames: self.frames.clone(),
            fail_after: self.fail_after,
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
