//! Response listener coroutine
//!
//! Reads server frames in arrival order and hands each decoded response to
//! the result handler. Exits when the socket closes, the engine stops, or a
//! restart becomes due. An open navigation window keeps it alive so the
//! destination can still be heard.

use super::connection::{decode_message, WsSource};
use super::session::RecognitionSession;
use crate::core::signals::EngineSignals;
use crate::protocol::ServerResponse;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Receives every decoded server response
pub trait ResponseHandler: Send + Sync {
    fn handle_response(&self, response: &ServerResponse);
}

pub async fn listen(
    mut source: WsSource,
    session: Arc<RecognitionSession>,
    handler: Arc<dyn ResponseHandler>,
    signals: Arc<EngineSignals>,
    poll: Duration,
) {
    info!("👂 Listening for recognition results");
    let mut received: u64 = 0;

    while session.is_connected() && signals.is_running() {
        match tokio::time::timeout(poll, source.next()).await {
            Err(_) => {}
            Ok(None) => {
                info!("🔌 ASR stream ended");
                session.mark_disconnected();
                break;
            }
            Ok(Some(Err(e))) => {
                warn!("❌ ASR socket error: {}", e);
                session.mark_disconnected();
                break;
            }
            Ok(Some(Ok(Message::Close(frame)))) => {
                info!("🔌 ASR service closed the connection: {:?}", frame);
                session.mark_disconnected();
                break;
            }
            Ok(Some(Ok(message))) => match decode_message(&message) {
                Some(response) => {
                    received += 1;
                    handler.handle_response(&response);
                }
                None => debug!("Skipping undecodable message ({} bytes)", message.len()),
            },
        }

        if signals.restart_due() {
            info!("🔄 Restart due, listener exiting");
            break;
        }
    }

    info!("👂 Listener finished after {} response(s)", received);
}
