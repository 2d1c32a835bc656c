use std::time::Duration;

use ion_media::types::{default_ice_servers, ICEServer};
use serde::{Deserialize, Serialize};

use crate::biz::PublishOptions;

pub const DEFAULT_SIGNAL_URL: &str = "ws://localhost:8443/ws";

/// Room session configuration
///
/// Deserializable with defaults so it can be embedded in a host
/// application's config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Signalling endpoint; `?peer=<participant id>` is appended on connect.
    pub url: String,
    pub room: String,
    /// Display name sent on join
    pub name: String,
    /// Participant id. A random UUID is generated when absent.
    pub peer_id: Option<String>,
    pub ice_servers: Vec<ICEServer>,
    pub request_timeout_ms: u64,
    pub publish: PublishOptions,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SIGNAL_URL.to_owned(),
            room: String::new(),
            name: String::new(),
            peer_id: None,
            ice_servers: default_ice_servers(),
            request_timeout_ms: ion_protoo::DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            publish: PublishOptions::default(),
        }
    }
}

impl RoomConfig {
    pub fn new(url: impl Into<String>, room: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            room: room.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_peer_id(mut self, set: impl Into<String>) -> Self {
        self.peer_id = Some(set.into());
        self
    }

    pub fn with_ice_servers(mut self, set: Vec<ICEServer>) -> Self {
        self.ice_servers = set;
        self
    }

    pub fn with_request_timeout(mut self, set: Duration) -> Self {
        self.request_timeout_ms = set.as_millis() as u64;
        self
    }

    pub fn with_publish_options(mut self, set: PublishOptions) -> Self {
        self.publish = set;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Signalling URL for participant `uid`
    pub fn signal_url(&self, uid: &str) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}peer={uid}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_url_appends_peer_query() {
        let config = RoomConfig::new("ws://sfu:8443/ws", "r1", "alice");
        assert_eq!(config.signal_url("u1"), "ws://sfu:8443/ws?peer=u1");

        let config = RoomConfig::new("ws://sfu:8443/ws?token=t", "r1", "alice");
        assert_eq!(config.signal_url("u1"), "ws://sfu:8443/ws?token=t&peer=u1");
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: RoomConfig = serde_json::from_str(r#"{"room":"r1","name":"alice"}"#).unwrap();
        assert_eq!(config.url, DEFAULT_SIGNAL_URL);
        assert_eq!(config.request_timeout(), ion_protoo::DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.ice_servers, default_ice_servers());
        assert!(config.peer_id.is_none());
    }
}
