//! Audio sender coroutine
//!
//! Drains the capture channel in order and streams each chunk as an
//! audio-only frame, pacing sends so the service is not flooded.

use super::connection::{send_frame, SharedSink};
use super::session::RecognitionSession;
use crate::audio::CaptureEvent;
use crate::core::signals::EngineSignals;
use crate::protocol::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SendTiming {
    /// Longest wait for a chunk before the flags are checked again
    pub poll: Duration,
    /// Pause after each sent chunk
    pub pacing: Duration,
}

/// How the sender loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderExit {
    RecordingStopped,
    WindDown,
    CaptureEnded,
    DeviceLost(String),
    SendFailed(String),
}

pub async fn stream_audio(
    mut frames: Receiver<CaptureEvent>,
    sink: SharedSink,
    session: Arc<RecognitionSession>,
    signals: Arc<EngineSignals>,
    recording: Arc<AtomicBool>,
    timing: SendTiming,
) -> SenderExit {
    let mut sent: u64 = 0;

    let exit = loop {
        if !recording.load(Ordering::SeqCst) || !session.is_connected() {
            break SenderExit::RecordingStopped;
        }
        if signals.should_wind_down() {
            break SenderExit::WindDown;
        }

        let event = match tokio::time::timeout(timing.poll, frames.recv()).await {
            Err(_) => continue,
            Ok(None) => break SenderExit::CaptureEnded,
            Ok(Some(event)) => event,
        };

        match event {
            CaptureEvent::DeviceLost(reason) => {
                warn!("🎤 Audio device lost: {}", reason);
                session.mark_disconnected();
                break SenderExit::DeviceLost(reason);
            }
            CaptureEvent::Chunk(chunk) => {
                let last = !recording.load(Ordering::SeqCst);
                if let Err(e) = send_frame(&sink, &session, Frame::audio(&chunk.data, last)).await {
                    warn!("❌ Failed to send audio chunk {}: {}", chunk.index, e);
                    session.mark_disconnected();
                    break SenderExit::SendFailed(e.to_string());
                }
                sent += 1;
                tokio::time::sleep(timing.pacing).await;
            }
        }
    };

    // Tell the service the utterance is over, unless the session is being recycled
    if session.is_connected() && !signals.restart_raised() {
        match send_frame(&sink, &session, Frame::audio(&[], true)).await {
            Ok(()) => debug!("Final audio frame sent"),
            Err(e) => debug!("Final audio frame not sent: {}", e),
        }
    }

    info!("📤 Audio sender finished ({:?}, {} chunk(s) sent)", exit, sent);
    exit
}
