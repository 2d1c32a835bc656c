//! ion signalling payloads
//!
//! Descriptor fields are flattened into the enclosing message, matching the
//! JSON the ion `biz` node produces and expects.

use std::collections::HashMap;

use ion_media::types::SessionDescription;
use serde::{Deserialize, Serialize};

/// Request and notification method names
pub mod method {
    pub const JOIN: &str = "join";
    pub const PUBLISH: &str = "publish";
    pub const UNPUBLISH: &str = "unpublish";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const STREAM_ADD: &str = "stream-add";
    pub const STREAM_REMOVE: &str = "stream-remove";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomInfo {
    #[serde(default)]
    pub rid: String,
    #[serde(default)]
    pub uid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub name: String,
}

/// Server-assigned descriptor of one published stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaInfo {
    /// data center
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dc: String,
    /// SFU node id
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nid: String,
    #[serde(default)]
    pub rid: String,
    /// publishing participant
    #[serde(default)]
    pub uid: String,
    /// stream id, unique within the room
    #[serde(default)]
    pub mid: String,
}

impl MediaInfo {
    pub fn new(rid: impl Into<String>, uid: impl Into<String>, mid: impl Into<String>) -> Self {
        Self { rid: rid.into(), uid: uid.into(), mid: mid.into(), ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub ssrc: u32,
    #[serde(default, rename = "pt")]
    pub payload: u8,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub fmtp: String,
}

/// Tracks of a stream, keyed by `<kind> <stream id>` as the SFU reports them
pub type TrackMap = HashMap<String, Vec<TrackInfo>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishOptions {
    pub codec: String,
    pub resolution: String,
    /// kbps
    pub bandwidth: u32,
    pub audio: bool,
    pub video: bool,
    pub screen: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            codec: "VP8".to_owned(),
            resolution: "hd".to_owned(),
            bandwidth: 1024,
            audio: true,
            video: true,
            screen: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinMsg {
    #[serde(flatten)]
    pub room: RoomInfo,
    pub info: UserInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishMsg {
    #[serde(flatten)]
    pub room: RoomInfo,
    pub jsep: SessionDescription,
    pub options: PublishOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResponseMsg {
    #[serde(flatten)]
    pub media: MediaInfo,
    pub jsep: SessionDescription,
    #[serde(default)]
    pub tracks: TrackMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnpublishMsg {
    #[serde(flatten)]
    pub media: MediaInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeMsg {
    #[serde(flatten)]
    pub media: MediaInfo,
    pub jsep: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeResponseMsg {
    #[serde(flatten)]
    pub media: MediaInfo,
    pub jsep: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamAddMsg {
    #[serde(flatten)]
    pub media: MediaInfo,
    #[serde(default)]
    pub info: UserInfo,
    #[serde(default)]
    pub tracks: TrackMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRemoveMsg {
    #[serde(flatten)]
    pub media: MediaInfo,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn join_flattens_room() {
        let msg = JoinMsg {
            room: RoomInfo { rid: "r1".into(), uid: "alice-id".into() },
            info: UserInfo { name: "alice".into() },
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"rid": "r1", "uid": "alice-id", "info": {"name": "alice"}})
        );
    }

    #[test]
    fn publish_response_decodes_descriptor_and_answer() {
        let data = json!({
            "mid": "m1",
            "rid": "r1",
            "jsep": {"type": "answer", "sdp": "v=0"},
            "tracks": {"audio m1": [{"id": "a", "ssrc": 1234, "pt": 111, "type": "audio", "codec": "opus"}]},
        });
        let msg: PublishResponseMsg = serde_json::from_value(data).unwrap();
        assert_eq!(msg.media.mid, "m1");
        assert_eq!(msg.media.rid, "r1");
        assert!(msg.media.nid.is_empty());
        assert_eq!(msg.jsep, SessionDescription::answer("v=0"));
        assert_eq!(msg.tracks["audio m1"][0].payload, 111);
    }

    #[test]
    fn publish_response_without_answer_is_malformed() {
        assert!(serde_json::from_value::<PublishResponseMsg>(json!({"mid": "m1"})).is_err());
    }

    #[test]
    fn stream_remove_tolerates_extra_fields() {
        let msg: StreamRemoveMsg =
            serde_json::from_value(json!({"mid": "m2", "uid": "bob", "rid": "r1", "extra": 1})).unwrap();
        assert_eq!(msg.media, MediaInfo::new("r1", "bob", "m2"));
    }

    #[test]
    fn empty_locator_fields_are_omitted() {
        let value = serde_json::to_value(UnpublishMsg { media: MediaInfo::new("r1", "u", "m1") }).unwrap();
        assert_eq!(value, json!({"rid": "r1", "uid": "u", "mid": "m1"}));
    }
}
