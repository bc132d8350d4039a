//! speechd-ng backend on the session bus
//!
//! The service queues text and returns at once, so a phrase could be cut
//! off by the next one. After handing a phrase over we hold the feedback
//! thread for roughly as long as the phrase takes to say.

use crate::tts::TtsEngine;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};
use zbus::{proxy, Connection};

/// Mandarin prompts run at about four characters a second
const PER_CHAR: Duration = Duration::from_millis(250);
const MIN_HOLD: Duration = Duration::from_millis(400);

#[proxy(
    interface = "org.speech.Service",
    default_service = "org.speech.Service",
    default_path = "/org/speech/Service"
)]
trait SpeechService {
    fn speak(&self, text: &str) -> zbus::Result<()>;
    fn ping(&self) -> zbus::Result<String>;
}

pub struct SpeechdEngine {
    proxy: SpeechServiceProxy<'static>,
    per_char: Duration,
}

impl std::fmt::Debug for SpeechdEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechdEngine")
            .field("per_char", &self.per_char)
            .finish_non_exhaustive()
    }
}

impl SpeechdEngine {
    /// Fails when the bus or the service is missing, so the feedback queue
    /// tries again on its next phrase
    pub async fn connect() -> Result<Self> {
        let connection = Connection::session()
            .await
            .context("no session bus for cabin prompts")?;
        let proxy = SpeechServiceProxy::new(&connection).await?;

        let version = proxy
            .ping()
            .await
            .context("speechd-ng did not answer ping")?;
        info!("🔊 Cabin prompts via speechd-ng ({})", version);

        Ok(Self {
            proxy,
            per_char: PER_CHAR,
        })
    }
}

/// How long the service needs to finish saying `text`
fn hold_time(text: &str, per_char: Duration) -> Duration {
    let spoken = text.chars().filter(|c| !c.is_whitespace()).count() as u32;
    (per_char * spoken).max(MIN_HOLD)
}

#[async_trait]
impl TtsEngine for SpeechdEngine {
    async fn speak(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        self.proxy
            .speak(text)
            .await
            .with_context(|| format!("speechd-ng rejected '{}'", text))?;

        let hold = hold_time(text, self.per_char);
        debug!("Holding {:?} for speechd-ng to finish '{}'", hold, text);
        tokio::time::sleep(hold).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "speechd_ng"
    }
}
