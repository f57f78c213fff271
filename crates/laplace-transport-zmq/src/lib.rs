//! ZeroMQ REP transport adapter for the Laplace middleware.
//!
//! A worker thread owns the REP socket inside a current-thread tokio runtime;
//! the blocking `ReplyChannel` side talks to it over channels.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use laplace_transport::{
    BindReplyChannel, CancelToken, PeerMessage, ReplyChannel, ReplyChannelError, ReplyFrames,
    ReplyHealthSnapshot,
};
use thiserror::Error;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::{debug, error, info, warn};
use zeromq::{RepSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

#[derive(Debug, Clone)]
pub struct ZmqReplyAdapterConfig {
    pub endpoint: String,
    pub inbound_queue_capacity: usize,
    pub receive_poll_interval: Duration,
    pub startup_timeout: Duration,
    pub max_payload_hint: Option<usize>,
}

impl ZmqReplyAdapterConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            inbound_queue_capacity: 16,
            receive_poll_interval: Duration::from_millis(50),
            startup_timeout: Duration::from_secs(2),
            max_payload_hint: None,
        }
    }

    /// Same settings bound to another endpoint.
    pub fn with_endpoint(&self, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Error)]
pub enum ZmqReplyAdapterError {
    #[error("adapter is closed")]
    Closed,
    #[error("cancelled")]
    Cancelled,
    #[error("bind failed on {endpoint}: {reason}")]
    BindFailed { endpoint: String, reason: String },
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("send failed, request dropped: {0}")]
    RequestLost(String),
    #[error("send cancelled")]
    SendCancelled,
    #[error("reply has no frames")]
    EmptyReply,
    #[error("payload exceeds max payload hint ({hint} bytes)")]
    PayloadTooLarge { hint: usize },
}

impl ReplyChannelError for ZmqReplyAdapterError {
    fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::SendCancelled)
    }

    fn reply_obligation_lost(&self) -> bool {
        matches!(self, Self::RequestLost(_) | Self::SendCancelled)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZmqReplyAdapterMetrics {
    pub requests_received: u64,
    pub replies_sent: u64,
    pub send_errors: u64,
    pub receive_errors: u64,
}

#[derive(Debug, Default)]
struct ZmqReplyAdapterMetricsInner {
    requests_received: AtomicU64,
    replies_sent: AtomicU64,
    send_errors: AtomicU64,
    receive_errors: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ZmqReplyAdapterMetricsInner {
    fn record_error(&self, err: &str) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(err.to_string());
        }
    }
}

/// Outcome the worker reports for one reply.
#[derive(Debug)]
enum SendFailure {
    /// Refused before reaching the socket; the request is still pending.
    Rejected(String),
    /// The socket consumed the request and failed to deliver the reply.
    Lost(String),
}

struct OutboundReply {
    frames: Vec<Bytes>,
    ack_tx: mpsc::SyncSender<Result<(), SendFailure>>,
    abandon_rx: oneshot::Receiver<()>,
}

pub struct ZmqReplyAdapter {
    endpoint: String,
    receive_poll_interval: Duration,
    max_payload_hint: Option<usize>,
    outbound_tx: tokio_mpsc::Sender<OutboundReply>,
    inbound_rx: mpsc::Receiver<PeerMessage>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    metrics: Arc<ZmqReplyAdapterMetricsInner>,
}

impl ZmqReplyAdapter {
    /// Binds a REP socket and waits for the worker to report the bind result.
    pub fn bind(config: ZmqReplyAdapterConfig) -> Result<Self, ZmqReplyAdapterError> {
        let (startup_tx, startup_rx) = mpsc::sync_channel::<Result<String, String>>(1);
        let (outbound_tx, outbound_rx) = tokio_mpsc::channel::<OutboundReply>(1);
        let (inbound_tx, inbound_rx) =
            mpsc::sync_channel::<PeerMessage>(config.inbound_queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(ZmqReplyAdapterMetricsInner::default());

        let worker_running = Arc::clone(&running);
        let worker_metrics = Arc::clone(&metrics);
        let worker_endpoint = config.endpoint.clone();
        let worker = thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(_) => {
                    let _ = startup_tx.send(Err("failed to build tokio runtime".to_string()));
                    worker_running.store(false, Ordering::Relaxed);
                    return;
                }
            };
            runtime.block_on(run_reply_worker(
                worker_endpoint,
                worker_running,
                worker_metrics,
                outbound_rx,
                inbound_tx,
                shutdown_rx,
                startup_tx,
            ));
        });

        let endpoint = match startup_rx.recv_timeout(config.startup_timeout) {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(reason)) => {
                let _ = worker.join();
                return Err(ZmqReplyAdapterError::BindFailed {
                    endpoint: config.endpoint,
                    reason,
                });
            }
            Err(_) => {
                return Err(ZmqReplyAdapterError::BindFailed {
                    endpoint: config.endpoint,
                    reason: "timed out waiting for bind".to_string(),
                });
            }
        };

        Ok(Self {
            endpoint,
            receive_poll_interval: config.receive_poll_interval,
            max_payload_hint: config.max_payload_hint,
            outbound_tx,
            inbound_rx,
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
            running,
            metrics,
        })
    }

    /// Endpoint the socket actually bound, with any wildcard port resolved.
    pub fn local_endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn metrics_snapshot(&self) -> ZmqReplyAdapterMetrics {
        ZmqReplyAdapterMetrics {
            requests_received: self.metrics.requests_received.load(Ordering::Relaxed),
            replies_sent: self.metrics.replies_sent.load(Ordering::Relaxed),
            send_errors: self.metrics.send_errors.load(Ordering::Relaxed),
            receive_errors: self.metrics.receive_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ZmqReplyAdapter {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl ReplyChannel for ZmqReplyAdapter {
    type Error = ZmqReplyAdapterError;

    fn receive_next(&mut self, cancel: &CancelToken) -> Result<PeerMessage, Self::Error> {
        loop {
            if cancel.is_cancelled() {
                return Err(ZmqReplyAdapterError::Cancelled);
            }
            match self.inbound_rx.recv_timeout(self.receive_poll_interval) {
                Ok(message) => return Ok(message),
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(ZmqReplyAdapterError::Closed);
                }
            }
        }
    }

    fn send_reply(
        &mut self,
        reply: &ReplyFrames,
        cancel: &CancelToken,
    ) -> Result<(), Self::Error> {
        if cancel.is_cancelled() {
            return Err(ZmqReplyAdapterError::Cancelled);
        }
        if reply.is_empty() {
            return Err(ZmqReplyAdapterError::EmptyReply);
        }
        if let Some(hint) = self.max_payload_hint {
            if reply.byte_len() > hint {
                return Err(ZmqReplyAdapterError::PayloadTooLarge { hint });
            }
        }
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        let (abandon_tx, abandon_rx) = oneshot::channel();
        self.outbound_tx
            .blocking_send(OutboundReply {
                frames: reply.frames().to_vec(),
                ack_tx,
                abandon_rx,
            })
            .map_err(|_| ZmqReplyAdapterError::Closed)?;
        loop {
            if cancel.is_cancelled() {
                // The worker either sent the reply or drops it; the request
                // is no longer pending in both cases.
                let _ = abandon_tx.send(());
                return Err(ZmqReplyAdapterError::SendCancelled);
            }
            match ack_rx.recv_timeout(self.receive_poll_interval) {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(SendFailure::Rejected(reason))) => {
                    return Err(ZmqReplyAdapterError::SendFailed(reason));
                }
                Ok(Err(SendFailure::Lost(reason))) => {
                    return Err(ZmqReplyAdapterError::RequestLost(reason));
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(ZmqReplyAdapterError::Closed);
                }
            }
        }
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.endpoint)
    }

    fn health_snapshot(&self) -> ReplyHealthSnapshot {
        let m = self.metrics_snapshot();
        ReplyHealthSnapshot {
            requests_received: m.requests_received,
            replies_sent: m.replies_sent,
            send_errors: m.send_errors,
            receive_errors: m.receive_errors,
            last_error: self
                .metrics
                .last_error
                .lock()
                .ok()
                .and_then(|last| last.clone()),
        }
    }
}

impl BindReplyChannel for ZmqReplyAdapter {
    fn bind(endpoint: &str) -> Result<Self, Self::Error> {
        ZmqReplyAdapter::bind(ZmqReplyAdapterConfig::new(endpoint))
    }
}

fn frames_to_message(frames: Vec<Bytes>) -> Result<ZmqMessage, String> {
    let mut frames = frames.into_iter();
    let first = frames
        .next()
        .ok_or_else(|| "reply has no frames".to_string())?;
    let mut message = ZmqMessage::from(first);
    for frame in frames {
        message.push_back(frame);
    }
    Ok(message)
}

async fn run_reply_worker(
    endpoint: String,
    running: Arc<AtomicBool>,
    metrics: Arc<ZmqReplyAdapterMetricsInner>,
    mut outbound_rx: tokio_mpsc::Receiver<OutboundReply>,
    inbound_tx: mpsc::SyncSender<PeerMessage>,
    mut shutdown_rx: oneshot::Receiver<()>,
    startup_tx: mpsc::SyncSender<Result<String, String>>,
) {
    let mut socket = RepSocket::new();
    let resolved = match socket.bind(&endpoint).await {
        Ok(resolved) => resolved.to_string(),
        Err(err) => {
            error!("zmq reply bind failed on {}: {}", endpoint, err);
            let _ = startup_tx.send(Err(err.to_string()));
            running.store(false, Ordering::Relaxed);
            return;
        }
    };
    info!("zmq reply socket bound to {}", resolved);
    let _ = startup_tx.send(Ok(resolved));

    'outer: loop {
        let request = tokio::select! {
            _ = &mut shutdown_rx => break 'outer,
            received = socket.recv() => match received {
                Ok(message) => message,
                Err(err) => {
                    metrics.receive_errors.fetch_add(1, Ordering::Relaxed);
                    metrics.record_error(&err.to_string());
                    warn!("zmq reply receive failed: {}", err);
                    continue;
                }
            },
        };

        let message = PeerMessage::new(request.into_vec());
        debug!("zmq reply received {} frame(s)", message.frames().len());
        metrics.requests_received.fetch_add(1, Ordering::Relaxed);
        if inbound_tx.send(message).is_err() {
            break 'outer;
        }

        // The socket owes one reply until a send consumes the request.
        loop {
            let reply = tokio::select! {
                _ = &mut shutdown_rx => break 'outer,
                maybe_reply = outbound_rx.recv() => match maybe_reply {
                    Some(reply) => reply,
                    None => break 'outer,
                },
            };
            let OutboundReply {
                frames,
                ack_tx,
                mut abandon_rx,
            } = reply;
            let message = match frames_to_message(frames) {
                Ok(message) => message,
                Err(reason) => {
                    let _ = ack_tx.send(Err(SendFailure::Rejected(reason)));
                    continue;
                }
            };
            // The send is polled before the abandon signal so it always takes
            // the pending request; after that the request is gone either way.
            let outcome = tokio::select! {
                biased;
                _ = &mut shutdown_rx => break 'outer,
                sent = socket.send(message) => Some(sent),
                _ = &mut abandon_rx => None,
            };
            match outcome {
                Some(Ok(())) => {
                    metrics.replies_sent.fetch_add(1, Ordering::Relaxed);
                    let _ = ack_tx.send(Ok(()));
                }
                Some(Err(err)) => {
                    metrics.send_errors.fetch_add(1, Ordering::Relaxed);
                    metrics.record_error(&err.to_string());
                    warn!("zmq reply send failed, request dropped: {}", err);
                    let _ = ack_tx.send(Err(SendFailure::Lost(err.to_string())));
                }
                None => debug!("zmq reply abandoned by caller"),
            }
            break;
        }
    }

    running.store(false, Ordering::Relaxed);
}
