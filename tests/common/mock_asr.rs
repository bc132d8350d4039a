//! Local stand-in for the streaming ASR service
//!
//! Accepts WebSocket connections on 127.0.0.1, records the auth headers and
//! the session-init request, acknowledges the handshake, then plays a
//! per-connection script of recognition results while counting audio frames.

use cabin_voice::asr::session::{HEADER_ACCESS_KEY, HEADER_APP_KEY, HEADER_CONNECT_ID};
use cabin_voice::protocol::{Frame, MessageType, ServerResponse};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Default)]
pub struct StubRecord {
    pub connections: AtomicUsize,
    pub audio_frames: AtomicUsize,
    pub last_frames: AtomicUsize,
    pub connect_ids: Mutex<Vec<String>>,
    pub app_keys: Mutex<Vec<String>>,
    pub access_keys: Mutex<Vec<String>>,
    pub init_requests: Mutex<Vec<Value>>,
}

pub struct AsrStub {
    pub url: String,
    pub record: Arc<StubRecord>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AsrStub {
    /// `script[n]` holds the texts sent on the n-th connection, `gap` apart
    pub fn start(script: Vec<Vec<&str>>, gap: Duration) -> Self {
        let script: Vec<Vec<String>> = script
            .into_iter()
            .map(|texts| texts.into_iter().map(str::to_string).collect())
            .collect();
        let record = Arc::new(StubRecord::default());
        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server_record = record.clone();
        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                addr_tx.send(listener.local_addr().unwrap()).unwrap();

                let accept_loop = async {
                    loop {
                        let Ok((stream, _)) = listener.accept().await else {
                            continue;
                        };
                        let index = server_record.connections.fetch_add(1, Ordering::SeqCst);
                        let texts = script.get(index).cloned().unwrap_or_default();
                        tokio::spawn(serve(stream, texts, gap, server_record.clone()));
                    }
                };

                tokio::select! {
                    _ = accept_loop => {}
                    _ = shutdown_rx => {}
                }
            });
        });

        let addr = addr_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        Self {
            url: format!("ws://{}", addr),
            record,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    pub fn connections(&self) -> usize {
        self.record.connections.load(Ordering::SeqCst)
    }

    pub fn audio_frames(&self) -> usize {
        self.record.audio_frames.load(Ordering::SeqCst)
    }

    pub fn connect_ids(&self) -> Vec<String> {
        self.record.connect_ids.lock().unwrap().clone()
    }

    /// Poll until at least `n` connections were accepted
    pub fn wait_for_connections(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.connections() >= n {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        self.connections() >= n
    }
}

impl Drop for AsrStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn result(sequence: u32, text: &str) -> Message {
    let response = ServerResponse {
        sequence,
        body: json!({ "result": { "text": text } }),
    };
    Message::Binary(response.encode().unwrap())
}

async fn serve(stream: TcpStream, texts: Vec<String>, gap: Duration, record: Arc<StubRecord>) {
    let headers = record.clone();
    let capture = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        headers.connect_ids.lock().unwrap().push(header(HEADER_CONNECT_ID));
        headers.app_keys.lock().unwrap().push(header(HEADER_APP_KEY));
        headers.access_keys.lock().unwrap().push(header(HEADER_ACCESS_KEY));
        Ok(resp)
    };
    let Ok(ws) = accept_hdr_async(stream, capture).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();

    match source.next().await {
        Some(Ok(Message::Binary(data))) => {
            if let Some(init) = Frame::decode(&data).and_then(|f| f.json()) {
                record.init_requests.lock().unwrap().push(init);
            }
        }
        _ => return,
    }
    if sink.send(result(1, "")).await.is_err() {
        return;
    }

    let writer = tokio::spawn(async move {
        for (i, text) in texts.iter().enumerate() {
            tokio::time::sleep(gap).await;
            if sink.send(result(i as u32 + 2, text)).await.is_err() {
                return;
            }
        }
        // Keep the write half open until the client hangs up
        std::future::pending::<()>().await;
    });

    while let Some(Ok(message)) = source.next().await {
        match message {
            Message::Binary(data) => {
                if let Some(frame) = Frame::decode(&data) {
                    if frame.message_type == MessageType::AudioOnlyRequest {
                        record.audio_frames.fetch_add(1, Ordering::SeqCst);
                        if frame.is_last_audio() {
                            record.last_frames.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    writer.abort();
}
