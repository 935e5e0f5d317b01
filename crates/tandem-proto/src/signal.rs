use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMediaKindError(String);

impl fmt::Display for ParseMediaKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown media kind '{}' (expected video or audio)", self.0)
    }
}

impl std::error::Error for ParseMediaKindError {}

impl FromStr for MediaKind {
    type Err = ParseMediaKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            other => Err(ParseMediaKindError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// An offer or answer. The payload is opaque to everything except the
/// transport that produced or consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Reachability descriptor in the shape browsers serialize `RTCIceCandidate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl Candidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Envelope exchanged between the two negotiation agents through the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    /// `None` marks end-of-candidates.
    IceCandidate {
        #[serde(default)]
        candidate: Option<Candidate>,
    },
    TrackAdded {
        kind: MediaKind,
    },
    TrackRemoved {
        kind: MediaKind,
    },
}

impl SignalMessage {
    pub fn from_description(description: SessionDescription) -> Self {
        match description.kind {
            SdpKind::Offer => SignalMessage::Offer {
                sdp: description.sdp,
            },
            SdpKind::Answer => SignalMessage::Answer {
                sdp: description.sdp,
            },
        }
    }

    /// Wire name of the variant, used as a log field.
    pub fn label(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice-candidate",
            SignalMessage::TrackAdded { .. } => "track-added",
            SignalMessage::TrackRemoved { .. } => "track-removed",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_uses_flat_type_tag() {
        let value = SignalMessage::Offer {
            sdp: "v=0".into(),
        }
        .to_value()
        .unwrap();
        assert_eq!(value, json!({ "type": "offer", "sdp": "v=0" }));
    }

    #[test]
    fn browser_candidate_shape_parses() {
        let raw = r#"{
            "type": "ice-candidate",
            "candidate": {
                "candidate": "candidate:1 1 udp 2130706431 192.168.1.4 50000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
                "usernameFragment": "abcd"
            }
        }"#;
        let message = SignalMessage::from_json(raw).unwrap();
        let candidate = match message {
            SignalMessage::IceCandidate {
                candidate: Some(candidate),
            } => candidate,
            other => panic!("expected a candidate, got {other:?}"),
        };
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(candidate.username_fragment.as_deref(), Some("abcd"));
    }

    #[test]
    fn null_candidate_is_end_of_candidates() {
        let message = SignalMessage::from_json(r#"{"type":"ice-candidate","candidate":null}"#)
            .unwrap();
        assert_eq!(message, SignalMessage::IceCandidate { candidate: None });
    }

    #[test]
    fn track_notices_use_kebab_case_tags() {
        let text = SignalMessage::TrackRemoved {
            kind: MediaKind::Audio,
        }
        .to_json()
        .unwrap();
        assert_eq!(text, r#"{"type":"track-removed","kind":"audio"}"#);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(SignalMessage::from_json(r#"{"type":"renegotiate"}"#).is_err());
        assert!(SignalMessage::from_json(r#"{"type":"track-added","kind":"screen"}"#).is_err());
    }

    #[test]
    fn media_kind_parses_case_insensitively() {
        assert_eq!("Video".parse::<MediaKind>().unwrap(), MediaKind::Video);
        assert_eq!(" audio ".parse::<MediaKind>().unwrap(), MediaKind::Audio);
        assert!("screen".parse::<MediaKind>().is_err());
    }
}
