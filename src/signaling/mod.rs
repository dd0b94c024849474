//! Signaling Protocol
//!
//! Typed JSON messages exchanged with the signaling server over the
//! persistent socket. Every message is an object tagged by `type`; optional
//! fields are omitted on the wire rather than sent as `null`.

pub mod options;
pub mod rpc;
pub mod types;

pub use options::NegotiationOptions;
pub use types::{AudioCodec, NotifyEventType, Rid, Role, SimulcastRequestRid, VideoCodec};

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Signaling message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Session request sent by the client
    Connect(SignalingConnect),
    /// SDP offer from the server
    Offer(SignalingOffer),
    /// SDP answer to an offer
    Answer(SignalingAnswer),
    /// ICE candidate
    Candidate(SignalingCandidate),
    /// Keepalive from the server
    Ping(SignalingPing),
    /// Keepalive response
    Pong(SignalingPong),
    /// Channel event broadcast by the server
    Notify(SignalingNotify),
    /// Renegotiation offer from the server, or the answer to one
    Update(SignalingUpdate),
}

/// Message discriminant, mostly for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Connect,
    Offer,
    Answer,
    Candidate,
    Ping,
    Pong,
    Notify,
    Update,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Connect => "connect",
            MessageType::Offer => "offer",
            MessageType::Answer => "answer",
            MessageType::Candidate => "candidate",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Notify => "notify",
            MessageType::Update => "update",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    /// Parse a signaling message from JSON text
    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        serde_json::from_str(json).map_err(|e| CodecError::Decode(e.to_string()))
    }

    /// Parse a signaling message from a binary frame
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Connect(_) => MessageType::Connect,
            Message::Offer(_) => MessageType::Offer,
            Message::Answer(_) => MessageType::Answer,
            Message::Candidate(_) => MessageType::Candidate,
            Message::Ping(_) => MessageType::Ping,
            Message::Pong(_) => MessageType::Pong,
            Message::Notify(_) => MessageType::Notify,
            Message::Update(_) => MessageType::Update,
        }
    }

    /// Server-assigned connection id, when the message carries one
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            Message::Offer(offer) => offer.connection_id.as_deref(),
            Message::Notify(notify) => notify.connection_id.as_deref(),
            _ => None,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Message::Answer(SignalingAnswer { sdp: sdp.into() })
    }

    pub fn update(sdp: impl Into<String>) -> Self {
        Message::Update(SignalingUpdate { sdp: sdp.into() })
    }

    pub fn candidate(candidate: impl Into<String>) -> Self {
        Message::Candidate(SignalingCandidate { candidate: candidate.into() })
    }

    pub fn pong() -> Self {
        Message::Pong(SignalingPong::default())
    }
}

/// `video`/`audio` entries of `connect`: either `false` or a parameter object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaSetting<T> {
    Flag(bool),
    Params(T),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingVideo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_type: Option<VideoCodec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingAudio {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_type: Option<AudioCodec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingConnect {
    pub role: Role,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub multistream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<MediaSetting<SignalingVideo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<MediaSetting<SignalingAudio>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulcast: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulcast_rid: Option<Rid>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl SignalingConnect {
    /// Build the `connect` request for a session.
    pub fn new(
        role: Role,
        channel_id: impl Into<String>,
        metadata: Option<Value>,
        options: &NegotiationOptions,
    ) -> Self {
        let video = if !options.video_enabled {
            Some(MediaSetting::Flag(false))
        } else {
            let video = SignalingVideo {
                codec_type: options.video_codec,
                bit_rate: options.video_bit_rate,
            };
            (video != SignalingVideo::default()).then_some(MediaSetting::Params(video))
        };

        let audio = if !options.audio_enabled {
            Some(MediaSetting::Flag(false))
        } else {
            let audio = SignalingAudio { codec_type: options.audio_codec };
            (audio != SignalingAudio::default()).then_some(MediaSetting::Params(audio))
        };

        let simulcast_rid = match role {
            Role::Downstream if options.simulcast => options.simulcast_rid,
            _ => None,
        };

        Self {
            role,
            channel_id: channel_id.into(),
            metadata,
            multistream: options.multistream,
            video,
            audio,
            simulcast: options.simulcast.then_some(true),
            simulcast_rid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Peer configuration the server asks the client to apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferConfiguration {
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<IceServer>,
    #[serde(rename = "iceTransportPolicy", default, skip_serializing_if = "Option::is_none")]
    pub ice_transport_policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingOffer {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    pub sdp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<OfferConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulcast: Option<bool>,
    /// Rids the receiver may request over RPC. Absent and empty are distinct.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulcast_rpc_rids: Option<Vec<Rid>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingAnswer {
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingCandidate {
    pub candidate: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingPing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalingPong {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
}

/// Channel event. Only `event_type` is required; a malformed optional field
/// reads as absent instead of failing the whole message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingNotify {
    pub event_type: NotifyEventType,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(
        rename = "minutes",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none",
    )]
    pub connection_time: Option<u64>,
    #[serde(
        rename = "channel_connections",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none",
    )]
    pub connection_count: Option<u32>,
    #[serde(
        rename = "channel_upstream_connections",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none",
    )]
    pub upstream_count: Option<u32>,
    #[serde(
        rename = "channel_downstream_connections",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none",
    )]
    pub downstream_count: Option<u32>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl SignalingNotify {
    /// Upstream/downstream counts, when the server reported both.
    pub fn connection_counts(&self) -> Option<(u32, u32)> {
        Some((self.upstream_count?, self.downstream_count?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingUpdate {
    pub sdp: String,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\n";

    fn offer_json(rids: Option<Value>) -> String {
        let mut offer = json!({
            "type": "offer",
            "client_id": "client123",
            "connection_id": "conn123",
            "sdp": SDP,
        });
        if let Some(rids) = rids {
            offer["simulcast_rpc_rids"] = rids;
        }
        offer.to_string()
    }

    #[test]
    fn test_parse_offer() {
        let msg = Message::from_json(&offer_json(None)).unwrap();
        match msg {
            Message::Offer(offer) => {
                assert_eq!(offer.client_id, "client123");
                assert_eq!(offer.connection_id.as_deref(), Some("conn123"));
                assert!(offer.sdp.starts_with("v=0"));
                assert_eq!(offer.simulcast_rpc_rids, None);
            }
            other => panic!("Expected Offer, got {:?}", other),
        }
    }

    #[test]
    fn test_offer_requires_client_id_and_sdp() {
        assert!(Message::from_json(r#"{"type":"offer","sdp":"v=0"}"#).is_err());
        assert!(Message::from_json(r#"{"type":"offer","client_id":"c"}"#).is_err());
    }

    #[test]
    fn test_simulcast_rpc_rids() {
        let cases = [
            (json!(["r0", "r1", "r2"]), Some(vec![Rid::R0, Rid::R1, Rid::R2])),
            (json!(["none"]), Some(vec![Rid::None])),
            (json!([]), Some(vec![])),
            (json!(["invalid"]), None),
        ];
        for (rids, expected) in cases {
            let result = Message::from_json(&offer_json(Some(rids.clone())));
            match expected {
                Some(expected) => match result {
                    Ok(Message::Offer(offer)) => {
                        assert_eq!(offer.simulcast_rpc_rids, Some(expected), "rids {}", rids)
                    }
                    other => panic!("unexpected result for {}: {:?}", rids, other),
                },
                None => assert!(result.is_err(), "rids {} should fail", rids),
            }
        }
    }

    #[test]
    fn test_unknown_type_fails() {
        let err = Message::from_json(r#"{"type":"snapshot","channel_id":"c"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(Message::from_json(r#"{"sdp":"v=0"}"#).is_err());
        assert!(Message::from_json(r#"["offer"]"#).is_err());
        assert!(Message::from_json("\"ping\"").is_err());
        assert!(Message::from_json("not json").is_err());
    }

    #[test]
    fn test_decode_from_bytes() {
        let msg = Message::from_slice(br#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, Message::Ping(SignalingPing::default()));
        assert!(Message::from_slice(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_connect_omits_default_fields() {
        let connect =
            SignalingConnect::new(Role::Downstream, "room", None, &NegotiationOptions::default());
        let json: Value =
            serde_json::from_str(&Message::Connect(connect).to_json().unwrap()).unwrap();
        assert_eq!(json, json!({"type": "connect", "role": "downstream", "channel_id": "room"}));
    }

    #[test]
    fn test_connect_with_options() {
        let options = NegotiationOptions {
            video_codec: Some(VideoCodec::H264),
            video_bit_rate: Some(1500),
            audio_enabled: false,
            multistream: true,
            ..Default::default()
        };
        let connect =
            SignalingConnect::new(Role::Upstream, "room", Some(json!({"token": "x"})), &options);
        let json: Value =
            serde_json::from_str(&Message::Connect(connect).to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "connect",
                "role": "upstream",
                "channel_id": "room",
                "metadata": {"token": "x"},
                "multistream": true,
                "video": {"codec_type": "H264", "bit_rate": 1500},
                "audio": false,
            })
        );
    }

    #[test]
    fn test_connect_simulcast_rid_only_for_downstream() {
        let options = NegotiationOptions {
            simulcast: true,
            simulcast_rid: Some(Rid::R1),
            ..Default::default()
        };
        let down = SignalingConnect::new(Role::Downstream, "room", None, &options);
        assert_eq!(down.simulcast, Some(true));
        assert_eq!(down.simulcast_rid, Some(Rid::R1));
        let up = SignalingConnect::new(Role::Upstream, "room", None, &options);
        assert_eq!(up.simulcast_rid, None);
    }

    #[test]
    fn test_connect_decodes_media_settings() {
        let msg = Message::from_json(
            r#"{"type":"connect","role":"upstream","channel_id":"c","video":false,"audio":{"codec_type":"PCMU"}}"#,
        )
        .unwrap();
        match msg {
            Message::Connect(connect) => {
                assert_eq!(connect.video, Some(MediaSetting::Flag(false)));
                assert_eq!(
                    connect.audio,
                    Some(MediaSetting::Params(SignalingAudio {
                        codec_type: Some(AudioCodec::Pcmu)
                    }))
                );
            }
            other => panic!("Expected Connect, got {:?}", other),
        }
    }

    #[test]
    fn test_answer_and_update_serialization() {
        let json = Message::answer("v=0...").to_json().unwrap();
        assert_eq!(json, r#"{"type":"answer","sdp":"v=0..."}"#);
        let json = Message::update("v=0...").to_json().unwrap();
        assert_eq!(json, r#"{"type":"update","sdp":"v=0..."}"#);
        let json = Message::pong().to_json().unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
        let json = Message::candidate("candidate:1 1 udp 1 10.0.0.1 5000 typ host")
            .to_json()
            .unwrap();
        assert!(json.contains(r#""type":"candidate""#));
    }

    #[test]
    fn test_notify_counts_and_lenient_fields() {
        let msg = Message::from_json(
            r#"{"type":"notify","event_type":"connection.created","role":"downstream",
                "minutes":"soon","channel_connections":3,
                "channel_upstream_connections":1,"channel_downstream_connections":2,
                "connection_id":"abc"}"#,
        )
        .unwrap();
        match &msg {
            Message::Notify(notify) => {
                assert_eq!(notify.event_type, NotifyEventType::ConnectionCreated);
                assert_eq!(notify.role, Some(Role::Downstream));
                assert_eq!(notify.connection_time, None);
                assert_eq!(notify.connection_count, Some(3));
                assert_eq!(notify.connection_counts(), Some((1, 2)));
            }
            other => panic!("Expected Notify, got {:?}", other),
        }
        assert_eq!(msg.connection_id(), Some("abc"));
    }

    #[test]
    fn test_notify_requires_event_type() {
        assert!(Message::from_json(r#"{"type":"notify","role":"upstream"}"#).is_err());
    }

    #[test]
    fn test_offer_configuration() {
        let msg = Message::from_json(
            r#"{"type":"offer","client_id":"c","sdp":"v=0",
                "config":{"iceServers":[{"urls":["turn:turn.example.com:3478"],"username":"u","credential":"p"}],
                          "iceTransportPolicy":"relay"}}"#,
        )
        .unwrap();
        match msg {
            Message::Offer(offer) => {
                let config = offer.config.unwrap();
                assert_eq!(config.ice_transport_policy.as_deref(), Some("relay"));
                assert_eq!(
                    config.ice_servers[0].urls,
                    vec!["turn:turn.example.com:3478".to_string()]
                );
            }
            other => panic!("Expected Offer, got {:?}", other),
        }
    }

    #[test]
    fn test_message_type_names() {
        let msg = Message::from_json(r#"{"type":"update","sdp":"v=0"}"#).unwrap();
        assert_eq!(msg.message_type(), MessageType::Update);
        assert_eq!(msg.message_type().to_string(), "update");
    }
}
