use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, error, info, warn};
use webrtc::{
    api::{interceptor_registry::register_default_interceptors, media_engine::MediaEngine, APIBuilder},
    ice_transport::{ice_connection_state::RTCIceConnectionState, ice_server::RTCIceServer},
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
        RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::RTPCodecType, rtp_transceiver_direction::RTCRtpTransceiverDirection,
        RTCRtpTransceiverInit,
    },
    track::{track_local::TrackLocal, track_remote::TrackRemote},
};

use crate::{
    types::{default_ice_servers, ICEServer, SDPType, SessionDescription, SessionRole},
    LocalTrack, MediaError, MediaFactory, MediaResult, MediaSession,
};

fn handle_peer_connection_state_change(
    label: &str,
    state: RTCPeerConnectionState,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
    if state == RTCPeerConnectionState::Failed {
        warn!("Peer connection failed ({label})");
    } else {
        debug!("Peer connection state has changed ({label}): {state}");
    }
    Box::pin(async {})
}

fn handle_ice_connection_state_change(
    label: &str,
    state: RTCIceConnectionState,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
    info!("{label} ICE connection state has changed: {state}");
    Box::pin(async {})
}

fn handle_remote_track(
    label: &str,
    track: Arc<TrackRemote>,
    track_tx: &flume::Sender<Arc<TrackRemote>>,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
    info!(
        "Remote track on {label} (kind: {}, id: {}, ssrc: {})",
        track.kind(),
        track.id(),
        track.ssrc()
    );
    if track_tx.send(track).is_err() {
        debug!("remote track receiver dropped ({label})");
    }
    Box::pin(async {})
}

impl From<ICEServer> for RTCIceServer {
    fn from(value: ICEServer) -> Self {
        Self {
            urls: value.urls,
            username: value.username,
            credential: value.credential,
            ..Default::default()
        }
    }
}

fn to_rtc_description(desc: SessionDescription) -> MediaResult<RTCSessionDescription> {
    let rtc = match desc.sdp_type {
        SDPType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SDPType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SDPType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SDPType::Rollback => return Err(MediaError::UnsupportedDescription(desc.sdp_type.to_string())),
    };
    Ok(rtc)
}

fn from_rtc_description(desc: RTCSessionDescription) -> MediaResult<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SDPType::Offer,
        RTCSdpType::Answer => SDPType::Answer,
        RTCSdpType::Pranswer => SDPType::Pranswer,
        RTCSdpType::Rollback => SDPType::Rollback,
        RTCSdpType::Unspecified => return Err(MediaError::UnsupportedDescription(desc.sdp_type.to_string())),
    };
    Ok(SessionDescription { sdp_type, sdp: desc.sdp })
}

/// Native media session over an `RTCPeerConnection`
pub struct PeerSession {
    label: String,
    role: SessionRole,
    connection: Arc<RTCPeerConnection>,
    closed: AtomicBool,
    remote_tracks_rx: flume::Receiver<Arc<TrackRemote>>,
}

impl PeerSession {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Remote tracks announced by the SFU on this session
    pub fn remote_tracks(&self) -> flume::Receiver<Arc<TrackRemote>> {
        self.remote_tracks_rx.clone()
    }

    pub fn connection(&self) -> &Arc<RTCPeerConnection> {
        &self.connection
    }

    fn ensure_open(&self) -> MediaResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(MediaError::Closed)
        } else {
            Ok(())
        }
    }
}

impl MediaSession for PeerSession {
    async fn add_track(&self, track: &LocalTrack) -> MediaResult<()> {
        self.ensure_open()?;
        let local: Arc<dyn TrackLocal + Send + Sync> = track.sample_track().clone();
        let sender = self.connection.add_track(local).await?;
        debug!("attached {} track {} to {}", track.kind(), track.id(), self.label);
        // RTCP must be read for interceptors (NACK, reports) to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> MediaResult<SessionDescription> {
        self.ensure_open()?;
        let offer = self.connection.create_offer(None).await?;
        let mut gathering_complete = self.connection.gathering_complete_promise().await;
        // sets the local SessionDescription and starts the UDP listeners
        self.connection.set_local_description(offer).await?;
        let _ = gathering_complete.recv().await;
        let local = self
            .connection
            .local_description()
            .await
            .ok_or(MediaError::MissingLocalDescription)?;
        from_rtc_description(local)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> MediaResult<()> {
        self.ensure_open()?;
        let desc = to_rtc_description(desc)?;
        self.connection.set_remote_description(desc).await?;
        Ok(())
    }

    async fn close(&self) -> MediaResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("closing media session {}", self.label);
        if let Err(e) = self.connection.close().await {
            error!("failed to close media session {} ({e})", self.label);
            return Err(e.into());
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Builds native [`PeerSession`]s sharing one ICE configuration.
#[derive(Clone)]
pub struct PeerSessionFactory {
    config: RTCConfiguration,
}

impl Default for PeerSessionFactory {
    fn default() -> Self {
        Self::new(default_ice_servers())
    }
}

impl PeerSessionFactory {
    pub fn new(ice_servers: Vec<ICEServer>) -> Self {
        let config = RTCConfiguration {
            ice_servers: ice_servers.into_iter().map(RTCIceServer::from).collect(),
            ..Default::default()
        };
        Self { config }
    }

    /// Specify internal WebRTC peer configuration settings
    pub fn set_config(mut self, set: RTCConfiguration) -> Self {
        self.config = set;
        self
    }
}

impl MediaFactory for PeerSessionFactory {
    type Session = PeerSession;

    async fn create_session(&self, role: SessionRole, label: &str) -> MediaResult<PeerSession> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        let connection = Arc::new(api.new_peer_connection(self.config.clone()).await?);

        // register state change handlers (logged only)
        let (state_label, ice_label, track_label) = (label.to_owned(), label.to_owned(), label.to_owned());
        connection.on_peer_connection_state_change(Box::new(move |state| {
            handle_peer_connection_state_change(&state_label, state)
        }));
        connection.on_ice_connection_state_change(Box::new(move |state| {
            handle_ice_connection_state_change(&ice_label, state)
        }));
        let (track_tx, remote_tracks_rx) = flume::unbounded();
        connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            handle_remote_track(&track_label, track, &track_tx)
        }));

        if role == SessionRole::Subscriber {
            for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
                let init = RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                };
                connection.add_transceiver_from_kind(kind, Some(init)).await?;
            }
        }

        debug!("created {role} media session ({label})");
        Ok(PeerSession {
            label: label.to_owned(),
            role,
            connection,
            closed: AtomicBool::new(false),
            remote_tracks_rx,
        })
    }
}
