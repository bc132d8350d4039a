//! WebSocket connection management
//!
//! All network coroutines run on a dedicated single-threaded tokio runtime
//! that lives on its own OS thread for the lifetime of one connection. The
//! synchronous supervisor reaches into it only through
//! [`NetworkContext::run_blocking`], which waits with a bounded timeout.

use super::session::RecognitionSession;
use crate::config::Config;
use crate::error::{VoiceError, VoiceResult};
use crate::protocol::{Frame, ServerResponse, SessionInit};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, Message>;
pub type WsSource = SplitStream<WsStream>;
/// Write half shared by the audio sender and the close path
pub type SharedSink = Arc<AsyncMutex<WsSink>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Background event loop hosting the network coroutines
#[derive(Debug)]
pub struct NetworkContext {
    handle: Handle,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl NetworkContext {
    pub fn start() -> VoiceResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown, stopped) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("asr-network".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = stopped.await;
                });
                // Dropping the runtime cancels whatever is still running
                debug!("Network event loop stopped");
            })?;

        Ok(Self {
            handle,
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run a future on the event loop and wait for it from a plain thread
    pub fn run_blocking<F, T>(&self, future: F, timeout: Duration) -> VoiceResult<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.handle.spawn(async move {
            let _ = tx.send(future.await);
        });

        rx.recv_timeout(timeout).map_err(|e| {
            VoiceError::Connection(format!(
                "network task did not finish within {:.1}s: {}",
                timeout.as_secs_f64(),
                e
            ))
        })
    }

    /// Stop the event loop and join its thread
    pub fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("❌ Network thread panicked");
            }
        }
    }
}

impl Drop for NetworkContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Open the socket, send the session request and wait for the handshake ack
pub async fn establish(
    config: Arc<Config>,
    session: Arc<RecognitionSession>,
) -> VoiceResult<(WsSink, WsSource)> {
    let mut request = config.asr_url.as_str().into_client_request()?;
    for (name, value) in session.auth_headers(&config) {
        let value = HeaderValue::from_str(&value)
            .map_err(|e| VoiceError::Config(format!("invalid {} header: {}", name, e)))?;
        request.headers_mut().insert(name, value);
    }

    info!("🔗 Connecting to {} ({})", config.asr_url, session.connect_id());
    let (ws, _) = connect_async(request).await?;
    let (mut sink, mut source) = ws.split();

    let init = Frame::session_init(&SessionInit::from_config(&config))?.encode()?;
    sink.send(Message::Binary(init.into())).await?;
    session.next_sequence();

    match tokio::time::timeout(config.ack_timeout(), source.next()).await {
        Err(_) => {
            info!("⏳ No handshake ack within {:?}, assuming connected", config.ack_timeout());
        }
        Ok(None) => {
            return Err(VoiceError::Connection("socket closed during handshake".to_string()));
        }
        Ok(Some(Err(e))) => return Err(e.into()),
        Ok(Some(Ok(message))) => match decode_message(&message) {
            Some(response) => {
                if let Some(err) = response.error() {
                    return Err(VoiceError::Connection(format!("handshake rejected: {}", err)));
                }
                debug!("Handshake ack: {}", response.body);
            }
            None => {
                return Err(VoiceError::ProtocolDecode(
                    "unreadable handshake response".to_string(),
                ));
            }
        },
    }

    session.mark_connected();
    info!("✅ ASR session {} established", session.connect_id());
    Ok((sink, source))
}

/// Decode a WebSocket message into a server response
pub fn decode_message(message: &Message) -> Option<ServerResponse> {
    match message {
        Message::Binary(data) => ServerResponse::decode(data),
        Message::Text(text) => ServerResponse::from_json_text(text),
        _ => None,
    }
}

/// Encode and send one frame, counting it against the session sequence
pub async fn send_frame(
    sink: &SharedSink,
    session: &RecognitionSession,
    frame: Frame,
) -> VoiceResult<()> {
    let bytes = frame.encode()?;
    sink.lock().await.send(Message::Binary(bytes.into())).await?;
    session.next_sequence();
    Ok(())
}

/// Owns the current connection: its event loop, session and socket halves
pub struct ConnectionManager {
    config: Arc<Config>,
    context: Option<NetworkContext>,
    session: Option<Arc<RecognitionSession>>,
    writer: Option<SharedSink>,
    reader: Option<WsSource>,
}

impl ConnectionManager {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            context: None,
            session: None,
            writer: None,
            reader: None,
        }
    }

    /// Tear down any previous connection and open a new one
    pub fn connect(&mut self) -> VoiceResult<Arc<RecognitionSession>> {
        self.disconnect();

        let context = NetworkContext::start()?;
        let session = Arc::new(RecognitionSession::new());

        let result = context.run_blocking(
            establish(self.config.clone(), session.clone()),
            self.config.bridge_timeout(),
        );

        match result.and_then(|r| r) {
            Ok((sink, source)) => {
                self.writer = Some(Arc::new(AsyncMutex::new(sink)));
                self.reader = Some(source);
                self.session = Some(session.clone());
                self.context = Some(context);
                Ok(session)
            }
            Err(e) => {
                session.mark_disconnected();
                warn!("❌ ASR connection failed: {}", e);
                // Context drops here, stopping its thread
                Err(e)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_connected())
    }

    pub fn session(&self) -> Option<Arc<RecognitionSession>> {
        self.session.clone()
    }

    pub fn writer(&self) -> Option<SharedSink> {
        self.writer.clone()
    }

    /// The read half can be handed out once per connection
    pub fn take_reader(&mut self) -> Option<WsSource> {
        self.reader.take()
    }

    pub fn spawn<F>(&self, future: F) -> Option<tokio::task::JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.context.as_ref().map(|c| c.spawn(future))
    }

    /// Close the socket if possible and stop the event loop
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.mark_disconnected();
        }

        if let (Some(context), Some(writer)) = (self.context.as_ref(), self.writer.take()) {
            let closed = context.run_blocking(
                async move {
                    let mut sink = writer.lock().await;
                    let _ = sink.send(Message::Close(None)).await;
                    sink.close().await
                },
                CLOSE_TIMEOUT,
            );
            match closed {
                Ok(Ok(())) => debug!("Socket closed"),
                Ok(Err(e)) => debug!("Socket close failed: {}", e),
                Err(e) => debug!("{}", e),
            }
        }

        self.reader = None;
        if let Some(mut context) = self.context.take() {
            context.shutdown();
            info!("🔌 Disconnected from ASR service");
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("session", &self.session)
            .field("has_reader", &self.reader.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
