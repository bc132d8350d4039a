//! Cabin Voice Library
//!
//! Continuous in-car voice command recognition: streams microphone audio to a
//! remote recognizer, maps recognized speech to vehicle commands, collects
//! navigation destinations, and speaks feedback to the driver.

pub mod asr;
pub mod audio;
pub mod audit;
pub mod commands;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod navigation;
pub mod protocol;
pub mod supervisor;
pub mod tts;

pub use engine::{CommandSink, Handled, ResultHandler};
pub use error::{VoiceError, VoiceResult};
pub use supervisor::{EngineStatus, Supervisor, SupervisorHandle, SupervisorState};
