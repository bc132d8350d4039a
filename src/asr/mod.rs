//! ASR (Automatic Speech Recognition) Module
//!
//! Streaming client for the remote recognition service:
//! - session: connect id, auth headers, frame sequence
//! - connection: event loop thread, WebSocket handshake, teardown
//! - sender: paced upload of captured audio
//! - listener: ordered delivery of recognition results

pub mod connection;
pub mod listener;
pub mod sender;
pub mod session;

pub use connection::{ConnectionManager, NetworkContext};
pub use listener::ResponseHandler;
pub use sender::{SendTiming, SenderExit};
pub use session::RecognitionSession;
