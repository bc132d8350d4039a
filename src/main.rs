//! Cabin Voice - in-car voice command recognition
//!
//! Streams the cabin microphone to the recognition service and prints every
//! resolved vehicle command.

use anyhow::{Context, Result};
use cabin_voice::audio::{self, CpalInput};
use cabin_voice::audit::AuditLog;
use cabin_voice::config::{self, Config};
use cabin_voice::engine::CommandSink;
use cabin_voice::supervisor::{Supervisor, SupervisorHandle};
use cabin_voice::tts::ConfiguredTts;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Audio input device index
    #[arg(short, long)]
    device: Option<usize>,

    /// Config file (defaults to the XDG config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TTS backend for spoken feedback (system, speechd)
    #[arg(long)]
    tts: Option<String>,

    /// List audio input devices and exit
    #[arg(long)]
    list_devices: bool,
}

/// The config actually in use, paired with the file it came from
fn load_config(explicit: Option<PathBuf>) -> Result<(PathBuf, Config)> {
    match explicit {
        Some(path) => {
            let loaded = Config::load_from(&path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            Ok((path, loaded))
        }
        None => Ok((config::config_path(), Config::load()?)),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let (config_file, mut config) = load_config(args.config.clone())?;

    let default_level = if args.verbose { "debug" } else { config.log_level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if args.list_devices {
        for (i, name) in audio::list_input_devices()?.iter().enumerate() {
            println!("{:>3}  {}", i, name);
        }
        return Ok(());
    }

    info!("🚗 Cabin Voice v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("📄 Config: {}", config_file.display());

    if let Some(device) = args.device {
        config.device_index = Some(device);
    }
    if let Some(tts) = args.tts {
        config.tts_engine = tts;
    }
    if config.app_key.is_empty() || config.access_key.is_empty() {
        warn!("⚠️ ASR credentials are empty, the service will likely reject us");
    }

    let audit = AuditLog::default_location();
    info!("📝 Command log: {}", audit.path().display());
    let sink: Arc<dyn CommandSink> = Arc::new(move |tag: &str, text: &str| -> Result<()> {
        info!("🚘 Command [{}]: {}", tag, text);
        if let Err(e) = audit.record(tag, text) {
            warn!("Could not write command log: {}", e);
        }
        Ok(())
    });

    let tts = Arc::new(ConfiguredTts::new(&config.tts_engine));
    let input = Arc::new(CpalInput::new(config.device_index));
    let mut supervisor = Supervisor::new(config, sink, tts, input)?;

    watch_ctrl_c(supervisor.handle())?;
    info!("✅ Cabin Voice ready - speak a command");
    info!("   Try: '打开空调', '导航到天津站', '打开车窗'");

    supervisor.run();
    Ok(())
}

/// Stop the supervisor on Ctrl-C
fn watch_ctrl_c(handle: SupervisorHandle) -> Result<()> {
    std::thread::Builder::new()
        .name("signal-watch".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("❌ Signal watcher runtime failed: {}", e);
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl-C received");
                }
            });
            handle.stop();
        })?;
    Ok(())
}
