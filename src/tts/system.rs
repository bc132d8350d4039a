//! Command-line TTS engine (spd-say, falling back to espeak-ng)

use super::TtsEngine;
use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Mandarin voice, block until speech ends
const SPD_SAY_ARGS: &[&str] = &["-w", "-l", "zh"];
const ESPEAK_ARGS: &[&str] = &["-v", "cmn"];

const CANDIDATES: [(&str, &[&str]); 2] = [("spd-say", SPD_SAY_ARGS), ("espeak-ng", ESPEAK_ARGS)];

#[derive(Debug)]
pub struct SystemEngine;

impl Default for SystemEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TtsEngine for SystemEngine {
    async fn speak(&self, text: &str) -> Result<()> {
        debug!("System speaking: {}", text);

        for (program, args) in CANDIDATES {
            match Command::new(program).args(args).arg(text).status().await {
                Ok(status) if status.success() => return Ok(()),
                Ok(status) => debug!("{} exited with {}", program, status),
                Err(e) => debug!("{} unavailable: {}", program, e),
            }
        }

        Err(anyhow::anyhow!(
            "No system TTS command succeeded (tried spd-say, espeak-ng)"
        ))
    }

    fn name(&self) -> &str {
        "system"
    }
}
