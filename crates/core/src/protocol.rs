//! Payloads exchanged between the two participants over a link.
//!
//! Every payload is a JSON object with a `type` discriminator. Links are
//! message oriented, so one link frame carries exactly one payload with no
//! length prefix (the TCP relay adds its own framing, see
//! [`crate::transport::wire`]).

use crate::chat::presence::PresenceStatus;
use crate::chat::types::Message;
use crate::error::{Error, Result};
use crate::identity::Identity;
use serde::{Deserialize, Serialize};

/// Typed link payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    /// First payload on a new link, confirming who is on the other end.
    Handshake {
        /// Sender identity.
        #[serde(alias = "user")]
        identity: HandshakeIdentity,
        /// Sender wall clock, milliseconds.
        timestamp: i64,
    },

    /// A chat message.
    Message(Message),

    /// Typing indicator change.
    #[serde(rename_all = "camelCase")]
    Typing {
        /// Whether the sender is typing.
        is_typing: bool,
        /// Sender display name.
        user: String,
    },

    /// Presence change.
    Presence {
        /// New status.
        status: PresenceStatus,
        /// Sender display name.
        user: String,
        /// Sender wall clock, milliseconds.
        timestamp: i64,
    },

    /// Any type this build does not know. Ignored on receipt.
    #[serde(other)]
    Unknown,
}

/// Identity as announced in a handshake.
///
/// Older peers send `peerId` instead of `networkAddress` and may omit the
/// avatar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeIdentity {
    /// Login id.
    pub login_id: String,
    /// Display name.
    pub display_name: String,
    /// Avatar glyph.
    #[serde(default)]
    pub avatar: String,
    /// Network address.
    #[serde(default, alias = "peerId")]
    pub network_address: String,
}

impl From<&Identity> for HandshakeIdentity {
    fn from(identity: &Identity) -> Self {
        Self {
            login_id: identity.login_id.clone(),
            display_name: identity.display_name.clone(),
            avatar: identity.avatar.clone(),
            network_address: identity.network_address.clone(),
        }
    }
}

impl Payload {
    /// Handshake announcing `identity`.
    pub fn handshake(identity: &Identity, timestamp: i64) -> Self {
        Payload::Handshake {
            identity: identity.into(),
            timestamp,
        }
    }

    /// Typing change from `identity`.
    pub fn typing(identity: &Identity, is_typing: bool) -> Self {
        Payload::Typing {
            is_typing,
            user: identity.display_name.clone(),
        }
    }

    /// Presence change from `identity`.
    pub fn presence(identity: &Identity, status: PresenceStatus, timestamp: i64) -> Self {
        Payload::Presence {
            status,
            user: identity.display_name.clone(),
            timestamp,
        }
    }

    /// Wire name of this payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Handshake { .. } => "handshake",
            Payload::Message(_) => "message",
            Payload::Typing { .. } => "typing",
            Payload::Presence { .. } => "presence",
            Payload::Unknown => "unknown",
        }
    }

    /// Encode for one link frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode one link frame.
    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::Protocol(format!("bad payload: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::MessageId;

    fn khusbu() -> Identity {
        Identity {
            login_id: "khusbu".to_string(),
            display_name: "Khusbu".to_string(),
            avatar: "👩".to_string(),
            network_address: "abhi-chat-khusbu-2025".to_string(),
        }
    }

    #[test]
    fn test_message_wire_shape() {
        let msg = Message {
            id: MessageId::from("m1"),
            text: "hello".to_string(),
            sender_id: "khusbu".to_string(),
            sender_name: "Khusbu".to_string(),
            avatar: "👩".to_string(),
            timestamp: 42,
        };
        let json: serde_json::Value =
            serde_json::from_slice(&Payload::Message(msg.clone()).encode().unwrap()).unwrap();

        assert_eq!(json["type"], "message");
        assert_eq!(json["id"], "m1");
        assert_eq!(json["senderId"], "khusbu");
        assert_eq!(json["senderName"], "Khusbu");

        let decoded = Payload::decode(json.to_string().as_bytes()).unwrap();
        assert_eq!(decoded, Payload::Message(msg));
    }

    #[test]
    fn test_typing_wire_shape() {
        let encoded = Payload::typing(&khusbu(), true).encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(json["type"], "typing");
        assert_eq!(json["isTyping"], true);
        assert_eq!(json["user"], "Khusbu");
    }

    #[test]
    fn test_legacy_handshake_accepted() {
        let json = r#"{"type":"handshake","user":{"loginId":"abhijit","displayName":"Abhijit","peerId":"abhi-chat-abhijit-2025","avatar":"👨","loginTime":1},"timestamp":7}"#;
        match Payload::decode(json.as_bytes()).unwrap() {
            Payload::Handshake { identity, timestamp } => {
                assert_eq!(identity.login_id, "abhijit");
                assert_eq!(identity.network_address, "abhi-chat-abhijit-2025");
                assert_eq!(timestamp, 7);
            }
            other => panic!("wrong payload: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let decoded = Payload::decode(br#"{"type":"reaction","emoji":"+1"}"#).unwrap();
        assert_eq!(decoded, Payload::Unknown);
    }

    #[test]
    fn test_presence_roundtrip() {
        let payload = Payload::presence(&khusbu(), PresenceStatus::Away, 99);
        let decoded = Payload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.kind(), "presence");
    }

    #[test]
    fn test_malformed_frame_is_protocol_error() {
        assert!(matches!(
            Payload::decode(b"{not json"),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            Payload::decode(br#"{"text":"no type"}"#),
            Err(Error::Protocol(_))
        ));
    }
}
