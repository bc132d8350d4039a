//! TTS (Text-to-Speech) Module
//!
//! Spoken feedback backends. The feedback queue only sees the `TtsEngine`
//! trait and builds engines lazily through a `TtsFactory`, so a backend that
//! fails mid-session can be dropped and rebuilt on the next phrase.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub mod speechd;
pub mod system;

/// Trait for TTS engines
#[async_trait]
pub trait TtsEngine: Send + Sync + std::fmt::Debug {
    /// Speak the given text, returning once playback has finished
    async fn speak(&self, text: &str) -> Result<()>;

    /// Get the engine name
    fn name(&self) -> &str;
}

/// Builds a fresh engine whenever the feedback worker needs one
#[async_trait]
pub trait TtsFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn TtsEngine>>;
}

/// Factory for the backend named in the config
#[derive(Debug, Clone)]
pub struct ConfiguredTts {
    engine: String,
}

impl ConfiguredTts {
    pub fn new(engine: &str) -> Self {
        Self {
            engine: engine.to_string(),
        }
    }
}

#[async_trait]
impl TtsFactory for ConfiguredTts {
    async fn create(&self) -> Result<Arc<dyn TtsEngine>> {
        create_engine(&self.engine).await
    }
}

/// Factory that always hands out the same engine
#[derive(Debug, Clone)]
pub struct SharedEngine(pub Arc<dyn TtsEngine>);

#[async_trait]
impl TtsFactory for SharedEngine {
    async fn create(&self) -> Result<Arc<dyn TtsEngine>> {
        Ok(self.0.clone())
    }
}

/// Create a TTS engine by name
pub async fn create_engine(name: &str) -> Result<Arc<dyn TtsEngine>> {
    info!("🛠️ Creating TTS engine: {}", name);
    let engine: Arc<dyn TtsEngine> = match name {
        "speechd_ng" | "speechd" => {
            info!("  - Using Speechd TTS");
            Arc::new(speechd::SpeechdEngine::connect().await?)
        }
        "system" => Arc::new(system::SystemEngine::new()),
        other => {
            warn!("  - Unknown engine '{}', falling back to System", other);
            Arc::new(system::SystemEngine::new())
        }
    };
    info!("✅ TTS engine '{}' initialized", engine.name());
    Ok(engine)
}
