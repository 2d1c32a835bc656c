use std::fmt;

use serde::{Deserialize, Serialize};

/// Public STUN server used when no ICE servers are configured.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// ICEServer describes a single STUN or TURN server that can be used by
/// the ICE agent to discover a reachable path to the SFU.
#[derive(Default, Debug, Clone, Serialize, Deserialize, Hash, PartialEq, Eq)]
pub struct ICEServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

impl ICEServer {
    /// Credential-less server from a single URL (typically STUN)
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }
}

/// ICE servers used by a session when the caller does not provide any.
pub fn default_ice_servers() -> Vec<ICEServer> {
    vec![ICEServer::from_url(DEFAULT_STUN_URL)]
}

/// SDPType describes the type of a SessionDescription.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize, Hash)]
pub enum SDPType {
    /// indicates that a description MUST be treated as an SDP offer.
    #[serde(rename = "offer")]
    Offer,
    /// indicates that a description MUST be treated as an SDP answer, but not
    /// a final answer.
    #[serde(rename = "pranswer")]
    Pranswer,
    /// indicates that a description MUST be treated as an SDP final answer,
    /// and the offer-answer exchange MUST be considered complete.
    #[serde(rename = "answer")]
    Answer,
    /// indicates that a description MUST be treated as cancelling the current
    /// SDP negotiation.
    #[serde(rename = "rollback")]
    Rollback,
}

impl fmt::Display for SDPType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SDPType::Offer => "offer",
            SDPType::Pranswer => "pranswer",
            SDPType::Answer => "answer",
            SDPType::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// SessionDescription is the `jsep` object exchanged with the SFU.
#[derive(Debug, Clone, Serialize, Deserialize, Hash, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SDPType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SDPType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SDPType::Answer, sdp: sdp.into() }
    }
}

/// Kind of a media track.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Direction of a media session relative to the local participant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SessionRole {
    /// Outbound session carrying local tracks to the SFU.
    Publisher,
    /// Inbound session receiving one remote stream from the SFU.
    ///
    /// Negotiated with recv-only audio and video transceivers.
    Subscriber,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Publisher => f.write_str("publisher"),
            SessionRole::Subscriber => f.write_str("subscriber"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsep_wire_shape() {
        let desc = SessionDescription::answer("v=0\r\n");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "answer", "sdp": "v=0\r\n" }));

        let parsed: SessionDescription =
            serde_json::from_str(r#"{"type":"offer","sdp":"x"}"#).unwrap();
        assert_eq!(parsed, SessionDescription::offer("x"));
    }

    #[test]
    fn ice_server_defaults_missing_credentials() {
        let server: ICEServer = serde_json::from_str(r#"{"urls":["stun:example.org"]}"#).unwrap();
        assert_eq!(server, ICEServer::from_url("stun:example.org"));
        assert_eq!(default_ice_servers()[0].urls, vec![DEFAULT_STUN_URL.to_string()]);
    }
}
