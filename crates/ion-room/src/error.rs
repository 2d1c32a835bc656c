use ion_media::MediaError;
use ion_protoo::PeerError;

#[derive(thiserror::Error, Debug)]
pub enum RoomError {
    #[error("rejected by server ({code} => {text})")]
    ServerRejected { code: i64, text: String },
    #[error("malformed payload ({0})")]
    PayloadDecodeFailed(#[from] serde_json::Error),
    #[error("media negotiation failed ({0})")]
    MediaNegotiationFailed(#[source] MediaError),
    #[error("could not attach local track ({0})")]
    TrackAttachFailed(#[source] MediaError),
    #[error(transparent)]
    Signal(PeerError),
    #[error("signalling channel not connected")]
    NotConnected,
    #[error("no local track to publish")]
    NothingToPublish,
    #[error("nothing published")]
    NotPublished,
    #[error("cancelled by session close")]
    Cancelled,
}

impl RoomError {
    /// Fatal errors mean the local media stack is broken; the session should
    /// be closed rather than the operation retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RoomError::MediaNegotiationFailed(_) | RoomError::TrackAttachFailed(_))
    }
}

impl From<PeerError> for RoomError {
    fn from(value: PeerError) -> Self {
        match value {
            PeerError::Rejected(e) => RoomError::ServerRejected { code: e.code, text: e.reason },
            other => RoomError::Signal(other),
        }
    }
}

/// Room client result type
pub type RoomResult<T> = Result<T, RoomError>;

#[cfg(test)]
mod tests {
    use ion_protoo::ResponseError;

    use super::*;

    #[test]
    fn rejection_keeps_code_and_text() {
        let error = RoomError::from(PeerError::Rejected(ResponseError { code: 403, reason: "full".into() }));
        assert!(matches!(&error, RoomError::ServerRejected { code: 403, text } if text == "full"));
        assert!(!error.is_fatal());
    }

    #[test]
    fn media_failures_are_fatal() {
        assert!(RoomError::TrackAttachFailed(MediaError::Closed).is_fatal());
        assert!(RoomError::MediaNegotiationFailed(MediaError::MissingLocalDescription).is_fatal());
        assert!(!RoomError::from(PeerError::Closed).is_fatal());
    }
}
