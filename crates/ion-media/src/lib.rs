//! Media sessions for ion SFU room clients
//!
//! A room client owns one outbound ([`SessionRole::Publisher`]) session and one
//! inbound ([`SessionRole::Subscriber`]) session per remote stream. Sessions
//! are created through a [`MediaFactory`]; [`PeerSessionFactory`] is the
//! native implementation over the `webrtc` crate.

use std::{fmt, future::Future, sync::Arc};

use webrtc::{
    api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8},
    rtp_transceiver::rtp_codec::RTCRtpCodecCapability,
    track::track_local::{track_local_static_sample::TrackLocalStaticSample, TrackLocal},
};

mod native;
pub mod types;

pub use native::{PeerSession, PeerSessionFactory};
use types::{MediaKind, SessionDescription, SessionRole};

#[derive(thiserror::Error, Debug)]
pub enum MediaError {
    #[error(transparent)]
    WebRTC(#[from] webrtc::Error),
    #[error("media session is closed")]
    Closed,
    #[error("no local description after negotiation")]
    MissingLocalDescription,
    #[error("unsupported session description type ({0})")]
    UnsupportedDescription(String),
    #[error("{0}")]
    Other(String),
}

/// Media result type
pub type MediaResult<T> = Result<T, MediaError>;

/// A local track that can be attached to a publisher session.
///
/// Samples are written by the caller through [`LocalTrack::sample_track`].
#[derive(Clone)]
pub struct LocalTrack {
    kind: MediaKind,
    track: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, track: Arc<TrackLocalStaticSample>) -> Self {
        Self { kind, track }
    }

    /// 48kHz stereo Opus audio track
    pub fn opus(track_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        };
        let track = TrackLocalStaticSample::new(capability, track_id.into(), stream_id.into());
        Self::new(MediaKind::Audio, Arc::new(track))
    }

    /// VP8 video track
    pub fn vp8(track_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        };
        let track = TrackLocalStaticSample::new(capability, track_id.into(), stream_id.into());
        Self::new(MediaKind::Video, Arc::new(track))
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        self.track.id()
    }

    pub fn sample_track(&self) -> &Arc<TrackLocalStaticSample> {
        &self.track
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("id", &self.id())
            .finish()
    }
}

/// One negotiated media session with the SFU.
#[trait_variant::make(MediaSession: Send)]
pub trait LocalMediaSession {
    /// Attach a local track (publisher sessions only)
    async fn add_track(&self, track: &LocalTrack) -> MediaResult<()>;

    /// Create an offer, apply it as the local description and return the
    /// final local description once ICE gathering completed.
    async fn create_offer(&self) -> MediaResult<SessionDescription>;

    /// Apply the SFU's answer
    async fn set_remote_description(&self, desc: SessionDescription) -> MediaResult<()>;

    /// Close the session. Closing twice is a no-op.
    async fn close(&self) -> MediaResult<()>;

    fn is_closed(&self) -> bool;
}

/// Creates media sessions with a fixed transport configuration.
pub trait MediaFactory: Send + Sync + 'static {
    type Session: MediaSession + Sync + 'static;

    /// Create a new session. `label` only identifies the session in logs.
    fn create_session(
        &self,
        role: SessionRole,
        label: &str,
    ) -> impl Future<Output = MediaResult<Self::Session>> + Send;
}
