//! Negotiation options requested by a session.

use super::types::{AudioCodec, Rid, VideoCodec};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Media capabilities requested in the `connect` message.
///
/// A codec of `None` means "default": the codec field is omitted on the wire
/// and the server picks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationOptions {
    #[serde(default = "default_enabled")]
    pub video_enabled: bool,
    #[serde(default, with = "codec_or_default")]
    pub video_codec: Option<VideoCodec>,
    /// Video bit rate in kbps
    #[serde(default)]
    pub video_bit_rate: Option<u32>,
    #[serde(default = "default_enabled")]
    pub audio_enabled: bool,
    #[serde(default, with = "codec_or_default")]
    pub audio_codec: Option<AudioCodec>,
    #[serde(default)]
    pub multistream: bool,
    #[serde(default)]
    pub simulcast: bool,
    /// Rid the downstream session asks for when simulcast is on
    #[serde(default)]
    pub simulcast_rid: Option<Rid>,
}

impl Default for NegotiationOptions {
    fn default() -> Self {
        Self {
            video_enabled: true,
            video_codec: None,
            video_bit_rate: None,
            audio_enabled: true,
            audio_codec: None,
            multistream: false,
            simulcast: false,
            simulcast_rid: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Codec fields accept the literal `"default"` as well as a wire codec.
pub(crate) mod codec_or_default {
    use super::*;

    pub fn serialize<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(codec) => codec.serialize(serializer),
            None => serializer.serialize_str("default"),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw.eq_ignore_ascii_case("default") {
            return Ok(None);
        }
        T::deserialize(serde::de::value::StringDeserializer::<D::Error>::new(raw)).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_audio_and_video() {
        let options = NegotiationOptions::default();
        assert!(options.video_enabled);
        assert!(options.audio_enabled);
        assert_eq!(options.video_codec, None);
        assert!(!options.multistream);
    }

    #[test]
    fn parse_from_toml() {
        let options: NegotiationOptions = toml::from_str(
            r#"
            video_codec = "VP9"
            video_bit_rate = 800
            audio_codec = "default"
            multistream = true
            "#,
        )
        .unwrap();
        assert_eq!(options.video_codec, Some(VideoCodec::VP9));
        assert_eq!(options.video_bit_rate, Some(800));
        assert_eq!(options.audio_codec, None);
        assert!(options.multistream);
        assert!(options.video_enabled);
    }

    #[test]
    fn unknown_codec_fails() {
        let result: Result<NegotiationOptions, _> = toml::from_str("video_codec = \"THEORA\"");
        assert!(result.is_err());
    }
}
