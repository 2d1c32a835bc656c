use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures_util::lock::Mutex;
use ion_media::{types::SessionRole, LocalTrack, MediaFactory, MediaSession, PeerSessionFactory};
use ion_protoo::{Notification, Peer, PeerError, PeerEvents};
use log::{debug, error, info, trace, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use uuid::Uuid;

use crate::{
    biz::{
        method, JoinMsg, MediaInfo, PublishMsg, PublishResponseMsg, RoomInfo, StreamAddMsg,
        StreamRemoveMsg, SubscribeMsg, SubscribeResponseMsg, UnpublishMsg, UserInfo,
    },
    RoomConfig, RoomError, RoomResult,
};

/// Receiving media session for one remote stream
pub struct Consumer<S> {
    session: Arc<S>,
    info: MediaInfo,
}

impl<S> Consumer<S> {
    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }
}

impl<S> Clone for Consumer<S> {
    fn clone(&self) -> Self {
        Self { session: self.session.clone(), info: self.info.clone() }
    }
}

/// Log a failed signalling round trip and convert it
fn signal_error(operation: &str, error: PeerError) -> RoomError {
    let error = RoomError::from(error);
    match &error {
        RoomError::ServerRejected { code, text } => info!("{operation} reject: {code} => {text}"),
        other => warn!("{operation} failed ({other})"),
    }
    error
}

/// Decode a response payload, logging malformed ones
fn decode<T: DeserializeOwned>(operation: &str, data: Value) -> RoomResult<T> {
    serde_json::from_value(data).map_err(|e| {
        warn!("{operation} response malformed ({e})");
        RoomError::PayloadDecodeFailed(e)
    })
}

/// A notification-driven subscribe in flight
struct Attempt {
    id: u64,
    cancel: CancellationToken,
}

/// State shared between the session, its dispatch loop and subscribe tasks
struct Shared<F: MediaFactory> {
    factory: F,
    room: RoomInfo,
    name: String,
    consumers: Mutex<Vec<Consumer<F::Session>>>,
    /// keyed by stream id, cancelled when the stream is removed
    subscribing: Mutex<HashMap<String, Attempt>>,
    next_attempt: AtomicU64,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl<F: MediaFactory> Shared<F> {
    /// Subscribe to `info.mid` unless `cancel` fires first
    async fn subscribe(&self, signal: &Peer, info: MediaInfo, cancel: &CancellationToken) -> RoomResult<()> {
        if self.consumers.lock().await.iter().any(|c| c.info.mid == info.mid) {
            debug!("already subscribed to {}", info.mid);
            return Ok(());
        }
        info!("Subscribing to {} (publisher: {})", info.mid, info.uid);
        let label = format!("{} consumer {}", self.name, info.mid);
        let session = self
            .factory
            .create_session(SessionRole::Subscriber, &label)
            .await
            .map_err(RoomError::MediaNegotiationFailed)?;
        let session = Arc::new(session);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RoomError::Cancelled),
            result = self.negotiate_subscription(signal, &session, &info) => result,
        };
        let registered = match result {
            Ok(()) => {
                let mut consumers = self.consumers.lock().await;
                // checked under the lock, a stream-remove cancels before it unsubscribes
                if cancel.is_cancelled() {
                    Err(RoomError::Cancelled)
                } else if consumers.iter().any(|c| c.info.mid == info.mid) {
                    Ok(false)
                } else {
                    consumers.push(Consumer { session: session.clone(), info: info.clone() });
                    Ok(true)
                }
            }
            Err(e) => Err(e),
        };
        match registered {
            Ok(true) => info!("Subscribe complete ({})", info.mid),
            Ok(false) => {
                warn!("concurrent subscribe to {} completed twice, dropping the later one", info.mid);
                if let Err(e) = session.close().await {
                    debug!("failed to close duplicate session for {} ({e})", info.mid);
                }
            }
            Err(e) => {
                // never registered, nothing else refers to it
                if let Err(close_err) = session.close().await {
                    debug!("failed to close abandoned session for {} ({close_err})", info.mid);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn negotiate_subscription(
        &self,
        signal: &Peer,
        session: &F::Session,
        info: &MediaInfo,
    ) -> RoomResult<()> {
        let offer = session.create_offer().await.map_err(RoomError::MediaNegotiationFailed)?;
        let mut media = info.clone();
        if media.rid.is_empty() {
            media.rid = self.room.rid.clone();
        }
        let request = SubscribeMsg { media, jsep: offer };
        let data = signal
            .request(method::SUBSCRIBE, &request)
            .await
            .map_err(|e| signal_error("subscribe", e))?;
        let response: SubscribeResponseMsg = decode("subscribe", data)?;
        session
            .set_remote_description(response.jsep)
            .await
            .map_err(RoomError::MediaNegotiationFailed)
    }

    /// Close and forget the consumer of `info.mid`. Returns whether one existed.
    async fn unsubscribe(&self, info: &MediaInfo) -> bool {
        let consumer = {
            let mut consumers = self.consumers.lock().await;
            consumers
                .iter()
                .position(|c| c.info.mid == info.mid)
                .map(|index| consumers.remove(index))
        };
        let Some(consumer) = consumer else {
            debug!("no subscription for {}", info.mid);
            return false;
        };
        info!("Closing subscription for {}", info.mid);
        if let Err(e) = consumer.session.close().await {
            warn!("failed to close subscription for {} ({e})", info.mid);
        }
        true
    }

    /// Claim `info.mid` and subscribe on a tracked task
    ///
    /// The claim is taken before returning so a following stream-remove
    /// always finds it.
    async fn spawn_subscribe(self: &Arc<Self>, signal: Arc<Peer>, info: MediaInfo) {
        let mid = info.mid.clone();
        let id = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.child_token();
        {
            let mut subscribing = self.subscribing.lock().await;
            if subscribing.contains_key(&mid) {
                debug!("subscribe to {mid} already in flight");
                return;
            }
            subscribing.insert(mid.clone(), Attempt { id, cancel: cancel.clone() });
        }
        let shared = self.clone();
        self.tasks.spawn(async move {
            match shared.subscribe(&signal, info, &cancel).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => error!("subscribe to {mid} failed, local media is broken ({e})"),
                Err(e) => warn!("subscribe to {mid} abandoned ({e})"),
            }
            let mut subscribing = shared.subscribing.lock().await;
            if subscribing.get(&mid).is_some_and(|attempt| attempt.id == id) {
                subscribing.remove(&mid);
            }
        });
    }

    async fn remove_stream(&self, info: &MediaInfo) {
        let attempt = self.subscribing.lock().await.remove(&info.mid);
        if let Some(attempt) = attempt {
            debug!("cancelling pending subscribe to {}", info.mid);
            attempt.cancel.cancel();
        }
        self.unsubscribe(info).await;
    }

    async fn handle_notification(self: &Arc<Self>, signal: &Arc<Peer>, notification: Notification) {
        match notification.method.as_str() {
            method::STREAM_ADD => match serde_json::from_value::<StreamAddMsg>(notification.data) {
                Ok(msg) if msg.media.mid.is_empty() => warn!("dropping stream-add without mid"),
                Ok(msg) => {
                    info!("New stream {} ({} tracks) from {}", msg.media.mid, msg.tracks.len(), msg.media.uid);
                    self.spawn_subscribe(signal.clone(), msg.media).await;
                }
                Err(e) => warn!("dropping malformed stream-add ({e})"),
            },
            method::STREAM_REMOVE => match serde_json::from_value::<StreamRemoveMsg>(notification.data) {
                Ok(msg) if msg.media.mid.is_empty() => warn!("dropping stream-remove without mid"),
                Ok(msg) => {
                    info!("Remove stream {}", msg.media.mid);
                    self.remove_stream(&msg.media).await;
                }
                Err(e) => warn!("dropping malformed stream-remove ({e})"),
            },
            other => trace!("ignoring notification ({other})"),
        }
    }
}

/// Dispatches signalling events until the session closes or the channel ends
async fn dispatch_loop<F: MediaFactory>(shared: Arc<Shared<F>>, signal: Arc<Peer>, events: PeerEvents) {
    let PeerEvents { requests, notifications, close } = events;
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            notification = notifications.recv_async() => match notification {
                Ok(notification) => shared.handle_notification(&signal, notification).await,
                Err(_) => break,
            },
            request = requests.recv_async() => match request {
                // requests from the SFU are not part of the client protocol
                Ok(request) => info!("Got request {} ({})", request.method(), request.data()),
                Err(_) => break,
            },
            event = close.recv_async() => match event {
                Ok(event) => info!("Peer close msg ({:?}: {})", event.code, event.reason),
                Err(_) => break,
            },
        }
    }
    debug!("signalling dispatch finished ({})", shared.room.uid);
}

/// One participant in one ion room
///
/// Lifecycle: [`new`](Self::new) → [`init`](Self::init) → [`join`](Self::join)
/// → [`publish`](Self::publish) / notifications → [`close`](Self::close).
pub struct RoomSession<F: MediaFactory> {
    config: RoomConfig,
    shared: Arc<Shared<F>>,
    signal: Option<Arc<Peer>>,
    publisher: Option<F::Session>,
    /// ids of the local tracks attached to the current publisher
    attached: Vec<String>,
    media: Option<MediaInfo>,
    audio_track: Option<LocalTrack>,
    video_track: Option<LocalTrack>,
    closed: bool,
}

impl RoomSession<PeerSessionFactory> {
    /// Session over native WebRTC, using the configured ICE servers
    pub fn native(config: RoomConfig) -> Self {
        let factory = PeerSessionFactory::new(config.ice_servers.clone());
        Self::new(config, factory)
    }
}

impl<F: MediaFactory> RoomSession<F> {
    pub fn new(config: RoomConfig, factory: F) -> Self {
        let uid = config.peer_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let shared = Shared {
            factory,
            room: RoomInfo { rid: config.room.clone(), uid },
            name: config.name.clone(),
            consumers: Mutex::new(vec![]),
            subscribing: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        };
        Self {
            config,
            shared: Arc::new(shared),
            signal: None,
            publisher: None,
            attached: vec![],
            media: None,
            audio_track: None,
            video_track: None,
            closed: false,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.shared.room.uid
    }

    pub fn room(&self) -> &RoomInfo {
        &self.shared.room
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Descriptor assigned by the server to our published stream
    pub fn media_info(&self) -> Option<&MediaInfo> {
        self.media.as_ref()
    }

    pub fn publisher(&self) -> Option<&F::Session> {
        self.publisher.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.signal.as_ref().is_some_and(|signal| !signal.is_closed())
    }

    pub fn set_audio_track(&mut self, track: LocalTrack) {
        self.audio_track = Some(track);
    }

    pub fn set_video_track(&mut self, track: LocalTrack) {
        self.video_track = Some(track);
    }

    /// Descriptors of the active subscriptions, in completion order
    pub async fn consumers(&self) -> Vec<MediaInfo> {
        self.shared.consumers.lock().await.iter().map(|c| c.info.clone()).collect()
    }

    pub async fn consumer(&self, mid: &str) -> Option<Consumer<F::Session>> {
        self.shared.consumers.lock().await.iter().find(|c| c.info.mid == mid).cloned()
    }

    fn signal(&self) -> RoomResult<&Arc<Peer>> {
        match &self.signal {
            Some(signal) if !self.closed => Ok(signal),
            _ => Err(RoomError::NotConnected),
        }
    }

    async fn create_publisher(&self) -> RoomResult<F::Session> {
        let label = format!("{} producer", self.config.name);
        self.shared
            .factory
            .create_session(SessionRole::Publisher, &label)
            .await
            .map_err(RoomError::MediaNegotiationFailed)
    }

    /// Create the outbound media session and open the signalling channel
    pub async fn init(&mut self) -> RoomResult<()> {
        if self.closed {
            return Err(RoomError::NotConnected);
        }
        if self.signal.is_some() {
            return Ok(());
        }
        if self.publisher.is_none() {
            self.publisher = Some(self.create_publisher().await?);
        }
        let url = self.config.signal_url(self.peer_id());
        let (peer, events) = Peer::connect(&url, self.peer_id(), self.config.request_timeout())
            .await
            .map_err(RoomError::from)?;
        info!("signalling connected ({url})");
        let signal = Arc::new(peer);
        self.shared
            .tasks
            .spawn(dispatch_loop(self.shared.clone(), signal.clone(), events));
        self.signal = Some(signal);
        Ok(())
    }

    pub async fn join(&self) -> RoomResult<()> {
        let signal = self.signal()?;
        let msg = JoinMsg {
            room: self.shared.room.clone(),
            info: UserInfo { name: self.config.name.clone() },
        };
        let data = signal
            .request(method::JOIN, &msg)
            .await
            .map_err(|e| signal_error("login", e))?;
        info!("login success: => {data}");
        Ok(())
    }

    /// Publish the local tracks and return the server's descriptor
    pub async fn publish(&mut self) -> RoomResult<MediaInfo> {
        let signal = self.signal()?.clone();
        let tracks: Vec<LocalTrack> = [self.audio_track.clone(), self.video_track.clone()]
            .into_iter()
            .flatten()
            .collect();
        if tracks.is_empty() {
            return Err(RoomError::NothingToPublish);
        }
        if self.publisher.is_none() {
            self.publisher = Some(self.create_publisher().await?);
            self.attached.clear();
        }
        let Some(publisher) = &self.publisher else {
            return Err(RoomError::NotConnected);
        };

        let unattached: Vec<&LocalTrack> = tracks
            .iter()
            .filter(|t| !self.attached.iter().any(|id| id == t.id()))
            .collect();
        for track in unattached {
            publisher.add_track(track).await.map_err(|e| {
                error!("failed to attach {} track {} ({e})", track.kind(), track.id());
                RoomError::TrackAttachFailed(e)
            })?;
            self.attached.push(track.id().to_owned());
        }

        let offer = publisher.create_offer().await.map_err(RoomError::MediaNegotiationFailed)?;
        let mut options = self.config.publish.clone();
        options.audio = self.audio_track.is_some();
        options.video = self.video_track.is_some();
        let msg = PublishMsg { room: self.shared.room.clone(), jsep: offer, options };
        let data = signal
            .request(method::PUBLISH, &msg)
            .await
            .map_err(|e| signal_error("publish", e))?;
        let response: PublishResponseMsg = decode("publish", data)?;

        // only an applied answer counts as published
        publisher
            .set_remote_description(response.jsep)
            .await
            .map_err(RoomError::MediaNegotiationFailed)?;
        self.media = Some(response.media.clone());
        info!("publish success: => {}", response.media.mid);
        Ok(response.media)
    }

    /// Withdraw the published stream and close the outbound session
    pub async fn unpublish(&mut self) -> RoomResult<()> {
        let signal = self.signal()?.clone();
        let mut media = self.media.clone().ok_or(RoomError::NotPublished)?;
        if media.rid.is_empty() {
            media.rid = self.shared.room.rid.clone();
        }
        signal
            .request(method::UNPUBLISH, &UnpublishMsg { media })
            .await
            .map_err(|e| signal_error("unpublish", e))?;
        self.media = None;
        self.attached.clear();
        if let Some(publisher) = self.publisher.take() {
            if let Err(e) = publisher.close().await {
                warn!("failed to close producer session ({e})");
            }
        }
        Ok(())
    }

    /// Subscribe to a remote stream, waiting for the negotiation to finish
    pub async fn subscribe(&self, info: MediaInfo) -> RoomResult<()> {
        let signal = self.signal()?;
        self.shared.subscribe(signal, info, &self.shared.cancel).await
    }

    /// Close the subscription to `info.mid`. Unknown streams are ignored.
    ///
    /// Nothing is sent to the server; the SFU drives teardown through
    /// `stream-remove`.
    pub async fn unsubscribe(&self, info: &MediaInfo) -> bool {
        self.shared.unsubscribe(info).await
    }

    /// Placeholder, the server is not told about leaving.
    pub async fn leave(&self) -> RoomResult<()> {
        debug!("leave ({}) is local only", self.shared.room.rid);
        Ok(())
    }

    /// Close the signalling channel and every media session
    ///
    /// In-flight subscribes are cancelled and awaited first. Closing twice is
    /// a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(signal) = self.signal.take() {
            signal.close();
        }
        self.shared.cancel.cancel();
        self.shared.tasks.close();
        self.shared.tasks.wait().await;

        let consumers = std::mem::take(&mut *self.shared.consumers.lock().await);
        for consumer in consumers {
            if let Err(e) = consumer.session.close().await {
                warn!("failed to close subscription for {} ({e})", consumer.info.mid);
            }
        }
        if let Some(publisher) = self.publisher.take() {
            if let Err(e) = publisher.close().await {
                warn!("failed to close producer session ({e})");
            }
        }
        info!("room session closed ({})", self.shared.room.uid);
    }
}

impl<F: MediaFactory> Drop for RoomSession<F> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        if let Some(signal) = &self.signal {
            signal.close();
        }
    }
}
