use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Signaling message exchanged over both links as a JSON text frame.
///
/// The `type` field discriminates the variant; anything else is a decode
/// error at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    /// Session description offered by the host.
    Offer { sdp: String },

    /// Our answer to an offer.
    Answer { sdp: String },

    /// Trickled connectivity candidate, in either direction.
    Candidate { candidate: IceCandidate },

    /// Latency probe.
    Ping,

    /// Reply to a latency probe.
    Pong,
}

impl SignalMessage {
    /// Single validating parse step for inbound frames.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(Error::decode)
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::serialization)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// Connectivity candidate in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CandidateRepr")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

// Some hosts trickle the bare candidate line instead of the init object.
#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateRepr {
    Line(String),
    Init {
        candidate: String,
        #[serde(rename = "sdpMid", default)]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex", default)]
        sdp_mline_index: Option<u16>,
        #[serde(rename = "usernameFragment", default)]
        username_fragment: Option<String>,
    },
}

impl From<CandidateRepr> for IceCandidate {
    fn from(repr: CandidateRepr) -> Self {
        match repr {
            CandidateRepr::Line(candidate) => IceCandidate::new(candidate),
            CandidateRepr::Init {
                candidate,
                sdp_mid,
                sdp_mline_index,
                username_fragment,
            } => IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
                username_fragment,
            },
        }
    }
}

/// Abstract console button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonId {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    L,
    R,
    Start,
    Select,
}

impl ButtonId {
    pub const ALL: [ButtonId; 10] = [
        ButtonId::Up,
        ButtonId::Down,
        ButtonId::Left,
        ButtonId::Right,
        ButtonId::A,
        ButtonId::B,
        ButtonId::L,
        ButtonId::R,
        ButtonId::Start,
        ButtonId::Select,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ButtonId::Up => "UP",
            ButtonId::Down => "DOWN",
            ButtonId::Left => "LEFT",
            ButtonId::Right => "RIGHT",
            ButtonId::A => "A",
            ButtonId::B => "B",
            ButtonId::L => "L",
            ButtonId::R => "R",
            ButtonId::Start => "START",
            ButtonId::Select => "SELECT",
        }
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ButtonId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ButtonId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::protocol(format!("unknown button `{s}`")))
    }
}

/// Key carried by a button event: either a mapped console button or the
/// upper-cased physical key that had no mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InputKey {
    Button(ButtonId),
    Unmapped(String),
}

impl InputKey {
    pub fn as_str(&self) -> &str {
        match self {
            InputKey::Button(id) => id.as_str(),
            InputKey::Unmapped(raw) => raw,
        }
    }
}

impl From<ButtonId> for InputKey {
    fn from(id: ButtonId) -> Self {
        InputKey::Button(id)
    }
}

impl From<String> for InputKey {
    fn from(raw: String) -> Self {
        match raw.parse::<ButtonId>() {
            Ok(id) => InputKey::Button(id),
            Err(_) => InputKey::Unmapped(raw),
        }
    }
}

impl From<InputKey> for String {
    fn from(key: InputKey) -> Self {
        match key {
            InputKey::Button(id) => id.as_str().to_string(),
            InputKey::Unmapped(raw) => raw,
        }
    }
}

impl fmt::Display for InputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonAction {
    Down,
    Up,
}

impl FromStr for ButtonAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "down" | "press" => Ok(ButtonAction::Down),
            "up" | "release" => Ok(ButtonAction::Up),
            other => Err(Error::protocol(format!("unknown button action `{other}`"))),
        }
    }
}

impl fmt::Display for ButtonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonAction::Down => f.write_str("down"),
            ButtonAction::Up => f.write_str("up"),
        }
    }
}

/// Button transition sent over the input link as `{"key": .., "action": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonEvent {
    pub key: InputKey,
    pub action: ButtonAction,
}

impl ButtonEvent {
    pub fn new(key: impl Into<InputKey>, action: ButtonAction) -> Self {
        Self {
            key: key.into(),
            action,
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::serialization)
    }
}
