use crate::commands::CommandBinding;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ASR service
    pub asr_url: String,
    pub app_key: String,
    pub access_key: String,
    pub resource_id: String,
    pub uid: String,
    pub platform: String,
    pub model_name: String,

    // Audio
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes per captured chunk (3200 bytes = 100 ms at 16 kHz mono 16-bit)
    pub chunk_size: usize,
    pub device_index: Option<usize>,
    pub audio_queue_capacity: usize,

    // Text handling
    pub command_cooldown_secs: f64,
    pub max_text_length: usize,

    // Navigation
    pub navigation_wait_secs: f64,

    // No-match guard
    pub no_match_restart_enabled: bool,
    pub max_no_match_count: u32,
    pub no_match_window_secs: f64,
    pub reset_no_match_on_restart: bool,

    // Timing
    pub restart_after_command: bool,
    pub restart_delay_secs: f64,
    pub reconnect_delay_secs: f64,
    pub disconnect_retry_secs: f64,
    pub ack_timeout_secs: f64,
    pub bridge_timeout_secs: f64,
    pub completion_delay_ms: u64,
    pub send_pacing_ms: u64,
    pub queue_poll_ms: u64,
    pub supervisor_poll_ms: u64,
    pub feedback_drain_retries: u32,

    // Speech output
    pub tts_engine: String,

    // Meta
    pub log_level: String,

    // Data
    pub custom_commands: Vec<CommandBinding>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            asr_url: "wss://openspeech.bytedance.com/api/v3/sauc/bigmodel".to_string(),
            app_key: "".to_string(),
            access_key: "".to_string(),
            resource_id: "volc.bigasr.sauc.duration".to_string(),
            uid: "car_system_client".to_string(),
            platform: "CarSystem".to_string(),
            model_name: "bigmodel".to_string(),
            sample_rate: 16000,
            channels: 1,
            chunk_size: 3200,
            device_index: None,
            audio_queue_capacity: 64,
            command_cooldown_secs: 3.0,
            max_text_length: 50,
            navigation_wait_secs: 3.0,
            no_match_restart_enabled: true,
            max_no_match_count: 20,
            no_match_window_secs: 30.0,
            reset_no_match_on_restart: true,
            restart_after_command: true,
            restart_delay_secs: 2.0,
            reconnect_delay_secs: 5.0,
            disconnect_retry_secs: 2.0,
            ack_timeout_secs: 10.0,
            bridge_timeout_secs: 30.0,
            completion_delay_ms: 1500,
            send_pacing_ms: 50,
            queue_poll_ms: 500,
            supervisor_poll_ms: 500,
            feedback_drain_retries: 10,
            tts_engine: "system".to_string(),
            log_level: "INFO".to_string(),
            custom_commands: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from the default location, or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load config from an explicit path; a missing file yields defaults.
    /// Environment credentials override whatever the file says.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env();
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                // Graceful degradation: log warning and use defaults
                tracing::warn!("⚠️ Config file corrupted or invalid, using defaults: {}", e);
                let backup_path = path.with_extension("json.corrupt");
                let _ = std::fs::rename(path, &backup_path);
                Ok(Self::default())
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Credentials are kept out of the config file when provided by the environment
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("CABIN_VOICE_APP_KEY") {
            self.app_key = v;
        }
        if let Ok(v) = std::env::var("CABIN_VOICE_ACCESS_KEY") {
            self.access_key = v;
        }
    }

    pub fn command_cooldown(&self) -> Duration {
        secs(self.command_cooldown_secs)
    }

    pub fn navigation_wait(&self) -> Duration {
        secs(self.navigation_wait_secs)
    }

    pub fn no_match_window(&self) -> Duration {
        secs(self.no_match_window_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        secs(self.restart_delay_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        secs(self.reconnect_delay_secs)
    }

    pub fn disconnect_retry(&self) -> Duration {
        secs(self.disconnect_retry_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        secs(self.ack_timeout_secs)
    }

    pub fn bridge_timeout(&self) -> Duration {
        secs(self.bridge_timeout_secs)
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }

    pub fn send_pacing(&self) -> Duration {
        Duration::from_millis(self.send_pacing_ms)
    }

    pub fn queue_poll(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }

    pub fn supervisor_poll(&self) -> Duration {
        Duration::from_millis(self.supervisor_poll_ms)
    }
}

/// Negative or NaN values collapse to zero instead of panicking
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cabin-voice")
        .join("config.json")
}
