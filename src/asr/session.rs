//! Per-connection recognition session state

use crate::config::Config;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;
use uuid::Uuid;

pub const HEADER_APP_KEY: &str = "X-Api-App-Key";
pub const HEADER_ACCESS_KEY: &str = "X-Api-Access-Key";
pub const HEADER_RESOURCE_ID: &str = "X-Api-Resource-Id";
pub const HEADER_CONNECT_ID: &str = "X-Api-Connect-Id";

/// One streaming session. A fresh session (and connect id) is created for
/// every connection attempt.
#[derive(Debug)]
pub struct RecognitionSession {
    connect_id: String,
    connected: AtomicBool,
    sequence: AtomicU64,
}

impl Default for RecognitionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionSession {
    pub fn new() -> Self {
        Self {
            connect_id: Uuid::new_v4().to_string(),
            connected: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn connect_id(&self) -> &str {
        &self.connect_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!("Session {} marked disconnected", self.connect_id);
        }
    }

    /// Count one sent frame, returning the new sequence number
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Authentication headers for the WebSocket upgrade
    pub fn auth_headers(&self, config: &Config) -> [(&'static str, String); 4] {
        [
            (HEADER_APP_KEY, config.app_key.clone()),
            (HEADER_ACCESS_KEY, config.access_key.clone()),
            (HEADER_RESOURCE_ID, config.resource_id.clone()),
            (HEADER_CONNECT_ID, self.connect_id.clone()),
        ]
    }
}
