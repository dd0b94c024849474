//! Enumerated wire values of the signaling protocol.
//!
//! Every enum here is a closed set: decoding an unknown token fails instead
//! of guessing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a session sends (upstream) or receives (downstream) media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Upstream,
    Downstream,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Upstream => "upstream",
            Role::Downstream => "downstream",
        }
    }

    pub const ALL: [Role; 2] = [Role::Upstream, Role::Downstream];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    VP8,
    VP9,
    H264,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::VP8 => "VP8",
            VideoCodec::VP9 => "VP9",
            VideoCodec::H264 => "H264",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::VP8 => "video/VP8",
            VideoCodec::VP9 => "video/VP9",
            VideoCodec::H264 => "video/H264",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioCodec {
    #[serde(rename = "OPUS")]
    Opus,
    #[serde(rename = "PCMU")]
    Pcmu,
}

impl AudioCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Opus => "OPUS",
            AudioCodec::Pcmu => "PCMU",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioCodec::Opus => "audio/opus",
            AudioCodec::Pcmu => "audio/PCMU",
        }
    }
}

/// Simulcast stream-quality identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rid {
    /// Receive no video
    None,
    R0,
    R1,
    R2,
}

impl Rid {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rid::None => "none",
            Rid::R0 => "r0",
            Rid::R1 => "r1",
            Rid::R2 => "r2",
        }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rid requested through the simulcast RPC; same closed set as [`Rid`].
pub type SimulcastRequestRid = Rid;

/// Kind of event announced by a `notify` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyEventType {
    #[serde(rename = "connection.created")]
    ConnectionCreated,
    #[serde(rename = "connection.updated")]
    ConnectionUpdated,
    #[serde(rename = "connection.destroyed")]
    ConnectionDestroyed,
    /// Events this client does not act on (spotlight, recording, ...)
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T>(value: T, wire: &str)
    where
        T: Serialize + for<'de> Deserialize<'de> + PartialEq + fmt::Debug,
    {
        let encoded = serde_json::to_string(&value).unwrap();
        assert_eq!(encoded, format!("\"{}\"", wire));
        let decoded: T = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn enumerated_values_round_trip() {
        round_trip(Role::Upstream, "upstream");
        round_trip(Role::Downstream, "downstream");
        round_trip(VideoCodec::VP8, "VP8");
        round_trip(VideoCodec::VP9, "VP9");
        round_trip(VideoCodec::H264, "H264");
        round_trip(AudioCodec::Opus, "OPUS");
        round_trip(AudioCodec::Pcmu, "PCMU");
        round_trip(Rid::None, "none");
        round_trip(Rid::R0, "r0");
        round_trip(Rid::R1, "r1");
        round_trip(Rid::R2, "r2");
    }

    #[test]
    fn as_str_matches_wire_value() {
        for rid in [Rid::None, Rid::R0, Rid::R1, Rid::R2] {
            assert_eq!(serde_json::to_string(&rid).unwrap(), format!("\"{}\"", rid.as_str()));
        }
        for role in Role::ALL {
            assert_eq!(serde_json::to_string(&role).unwrap(), format!("\"{}\"", role));
        }
    }

    #[test]
    fn invalid_rid_is_rejected() {
        assert!(serde_json::from_str::<Rid>("\"invalid\"").is_err());
        assert!(serde_json::from_str::<SimulcastRequestRid>("\"invalid\"").is_err());
        assert!(serde_json::from_str::<Rid>("\"R1\"").is_err());
    }

    #[test]
    fn unknown_codec_is_rejected() {
        assert!(serde_json::from_str::<VideoCodec>("\"AV1\"").is_err());
        assert!(serde_json::from_str::<AudioCodec>("\"opus\"").is_err());
        assert!(serde_json::from_str::<Role>("\"sendrecv\"").is_err());
    }

    #[test]
    fn unknown_notify_event_is_tolerated() {
        let event: NotifyEventType = serde_json::from_str("\"spotlight.changed\"").unwrap();
        assert_eq!(event, NotifyEventType::Other);
        let event: NotifyEventType = serde_json::from_str("\"connection.created\"").unwrap();
        assert_eq!(event, NotifyEventType::ConnectionCreated);
    }
}
