use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::{lock::Mutex, stream::SplitStream, SinkExt, StreamExt};
use log::{debug, trace, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot},
};
use tokio_tungstenite::{
    tungstenite::{
        self,
        client::IntoClientRequest,
        handshake::server::{ErrorResponse, Request as HandshakeRequest, Response as HandshakeResponse},
        http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message as WsMessage,
    },
    WebSocketStream,
};

use crate::message::{Message, MessageError, Notification, Request, Response, ResponseError};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket subprotocol spoken by protoo servers
pub const PROTOO_SUBPROTOCOL: &str = "protoo";

#[derive(thiserror::Error, Debug)]
pub enum PeerError {
    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("request rejected ({0})")]
    Rejected(#[from] ResponseError),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("peer closed")]
    Closed,
}

/// protoo peer result type
pub type PeerResult<T> = Result<T, PeerError>;

/// Why the underlying connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: Option<u16>,
    pub reason: String,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, ResponseError>>>>>;

/// Answers exactly one inbound request
#[derive(Debug)]
pub struct Responder {
    id: u64,
    outgoing_tx: mpsc::UnboundedSender<WsMessage>,
}

impl Responder {
    fn respond(self, result: Result<Value, ResponseError>) -> PeerResult<()> {
        let text = Message::Response(Response { id: self.id, result }).to_json()?;
        self.outgoing_tx.send(WsMessage::Text(text)).map_err(|_| PeerError::Closed)
    }

    pub fn accept<T: Serialize + ?Sized>(self, data: &T) -> PeerResult<()> {
        let data = serde_json::to_value(data)?;
        self.respond(Ok(data))
    }

    pub fn reject(self, code: i64, reason: impl Into<String>) -> PeerResult<()> {
        self.respond(Err(ResponseError { code, reason: reason.into() }))
    }
}

/// A request received from the remote peer
#[derive(Debug)]
pub struct InboundRequest {
    pub request: Request,
    responder: Responder,
}

impl InboundRequest {
    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn data(&self) -> &Value {
        &self.request.data
    }

    pub fn accept<T: Serialize + ?Sized>(self, data: &T) -> PeerResult<()> {
        self.responder.accept(data)
    }

    pub fn reject(self, code: i64, reason: impl Into<String>) -> PeerResult<()> {
        self.responder.reject(code, reason)
    }
}

/// Inbound event sources of a [`Peer`]
///
/// All three receivers disconnect once the connection has ended and their
/// buffered events were drained.
pub struct PeerEvents {
    pub requests: flume::Receiver<InboundRequest>,
    pub notifications: flume::Receiver<Notification>,
    pub close: flume::Receiver<CloseEvent>,
}

/// protoo peer over a WebSocket connection
///
/// Both sides of a protoo connection are peers: either may send requests and
/// notifications, responses are matched to requests by id.
pub struct Peer {
    id: String,
    outgoing_tx: mpsc::UnboundedSender<WsMessage>,
    pending: Pending,
    next_id: AtomicU64,
    request_timeout: Duration,
    closed: Arc<AtomicBool>,
}

/// Private writer task, forwards queued frames to the socket
async fn writer_task<S>(
    mut sink: futures_util::stream::SplitSink<WebSocketStream<S>, WsMessage>,
    mut outgoing_rx: mpsc::UnboundedReceiver<WsMessage>,
    id: String,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    while let Some(message) = outgoing_rx.recv().await {
        let is_close = matches!(message, WsMessage::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!("peer ({id}) write failed ({e})");
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = sink.close().await;
    trace!("peer ({id}) writer finished");
}

struct ReaderContext {
    id: String,
    pending: Pending,
    outgoing_tx: mpsc::UnboundedSender<WsMessage>,
    requests_tx: flume::Sender<InboundRequest>,
    notifications_tx: flume::Sender<Notification>,
    close_tx: flume::Sender<CloseEvent>,
    closed: Arc<AtomicBool>,
}

impl ReaderContext {
    async fn dispatch(&self, text: &str) {
        match Message::from_json(text) {
            Ok(Message::Response(response)) => {
                let waiter = self.pending.lock().await.remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response.result);
                    }
                    None => warn!("peer ({}) response for unknown request ({})", self.id, response.id),
                }
            }
            Ok(Message::Request(request)) => {
                trace!("peer ({}) inbound request ({}:{})", self.id, request.method, request.id);
                let responder = Responder { id: request.id, outgoing_tx: self.outgoing_tx.clone() };
                if self.requests_tx.send(InboundRequest { request, responder }).is_err() {
                    debug!("peer ({}) request receiver dropped", self.id);
                }
            }
            Ok(Message::Notification(notification)) => {
                trace!("peer ({}) notification ({})", self.id, notification.method);
                if self.notifications_tx.send(notification).is_err() {
                    debug!("peer ({}) notification receiver dropped", self.id);
                }
            }
            Err(e) => warn!("peer ({}) dropping malformed frame ({e})", self.id),
        }
    }
}

/// Private reader task, dispatches frames until the connection ends
async fn reader_task<S>(mut stream: SplitStream<WebSocketStream<S>>, ctx: ReaderContext)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let event = loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => ctx.dispatch(&text).await,
            Some(Ok(WsMessage::Close(frame))) => {
                break match frame {
                    Some(frame) => CloseEvent {
                        code: Some(u16::from(frame.code)),
                        reason: frame.reason.into_owned(),
                    },
                    None => CloseEvent { code: None, reason: String::new() },
                };
            }
            Some(Ok(other)) => trace!("peer ({}) ignoring non-text frame ({} bytes)", ctx.id, other.len()),
            Some(Err(e)) => {
                warn!("peer ({}) connection error ({e})", ctx.id);
                break CloseEvent { code: None, reason: e.to_string() };
            }
            None => break CloseEvent { code: None, reason: "connection ended".to_owned() },
        }
    };
    debug!("peer ({}) closed ({event:?})", ctx.id);
    ctx.closed.store(true, Ordering::Release);
    // dropping the waiters fails in-flight requests with `PeerError::Closed`
    ctx.pending.lock().await.clear();
    let _ = ctx.close_tx.send(event);
}

impl Peer {
    /// Connect to a protoo server and start the peer
    pub async fn connect(
        url: &str,
        id: impl Into<String>,
        request_timeout: Duration,
    ) -> PeerResult<(Self, PeerEvents)> {
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(PROTOO_SUBPROTOCOL));
        let (ws, response) = tokio_tungstenite::connect_async(request).await?;
        debug!("signalling websocket connected ({url}, status: {})", response.status());
        Ok(Self::from_stream(id, ws, request_timeout))
    }

    /// Accept an incoming protoo connection on `stream`
    ///
    /// Returns the peer, its events and the request path (including query),
    /// which carries the remote `?peer=` id.
    pub async fn accept<S>(
        stream: S,
        id: impl Into<String>,
        request_timeout: Duration,
    ) -> PeerResult<(Self, PeerEvents, String)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut path = String::new();
        let callback = |request: &HandshakeRequest, mut response: HandshakeResponse| -> Result<HandshakeResponse, ErrorResponse> {
            path = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_owned())
                .unwrap_or_default();
            if request.headers().contains_key(SEC_WEBSOCKET_PROTOCOL) {
                response
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(PROTOO_SUBPROTOCOL));
            }
            Ok(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
        let (peer, events) = Self::from_stream(id, ws, request_timeout);
        Ok((peer, events, path))
    }

    /// Start a peer over an established WebSocket
    ///
    /// Must be called within a tokio runtime.
    pub fn from_stream<S>(
        id: impl Into<String>,
        ws: WebSocketStream<S>,
        request_timeout: Duration,
    ) -> (Self, PeerEvents)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = id.into();
        let (sink, stream) = ws.split();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests) = flume::unbounded();
        let (notifications_tx, notifications) = flume::unbounded();
        let (close_tx, close) = flume::bounded(1);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(writer_task(sink, outgoing_rx, id.clone()));
        let ctx = ReaderContext {
            id: id.clone(),
            pending: pending.clone(),
            outgoing_tx: outgoing_tx.clone(),
            requests_tx,
            notifications_tx,
            close_tx,
            closed: closed.clone(),
        };
        tokio::spawn(reader_task(stream, ctx));

        let peer = Self {
            id,
            outgoing_tx,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            closed,
        };
        (peer, PeerEvents { requests, notifications, close })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send a request and wait for its response
    ///
    /// A response with `ok: false` is returned as [`PeerError::Rejected`].
    pub async fn request<T: Serialize + ?Sized>(&self, method: &str, data: &T) -> PeerResult<Value> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let data = serde_json::to_value(data)?;
        let text = Message::Request(Request { id, method: method.to_owned(), data }).to_json()?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        if self.is_closed() || self.outgoing_tx.send(WsMessage::Text(text)).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(PeerError::Closed);
        }
        trace!("peer ({}) request sent ({method}:{id})", self.id);
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(e))) => Err(PeerError::Rejected(e)),
            Ok(Err(_)) => Err(PeerError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(PeerError::Timeout(self.request_timeout))
            }
        }
    }

    /// Send a notification (no response expected)
    pub fn notify<T: Serialize + ?Sized>(&self, method: &str, data: &T) -> PeerResult<()> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        let data = serde_json::to_value(data)?;
        let text = Message::Notification(Notification { method: method.to_owned(), data }).to_json()?;
        self.outgoing_tx.send(WsMessage::Text(text)).map_err(|_| PeerError::Closed)
    }

    /// Start the close handshake. Closing twice is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing peer ({})", self.id);
        let frame = CloseFrame { code: CloseCode::Normal, reason: "".into() };
        let _ = self.outgoing_tx.send(WsMessage::Close(Some(frame)));
    }
}
