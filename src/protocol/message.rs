//! Frames exchanged over the socket.
//!
//! ```text
//! heartbeat      ?,,
//! heartbeat ack  !<digits>
//! control        <tag>,<JSON array>      text
//! encrypted      <tag>,<hmac><iv><ct>    binary
//! ```

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{constants, ProtocolError, Result};
use crate::transport::WireMessage;

/// Keep-alive sent on every heartbeat tick.
pub const HEARTBEAT: &str = "?,,";

/// Control categories that carry nothing the client acts on.
pub const IGNORED_CATEGORIES: [&str; 3] = ["Blocklist", "Stream", "Props"];

/// Body of a control frame. Text that is not valid JSON is kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlPayload {
    Json(Value),
    Raw(String),
}

impl ControlPayload {
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text)
            .map(ControlPayload::Json)
            .unwrap_or_else(|_| ControlPayload::Raw(text.to_owned()))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ControlPayload::Json(value) => Some(value),
            ControlPayload::Raw(_) => None,
        }
    }

    /// First element of a JSON array payload, if it is a string.
    pub fn category(&self) -> Option<&str> {
        self.as_json()?.get(0)?.as_str()
    }

    /// `status` field of an object payload, whether sent as number or string.
    pub fn status(&self) -> Option<String> {
        match self.as_json()?.get("status")? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Whether the `status` field reads as 200.
    pub fn is_success(&self) -> bool {
        self.status()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .is_some_and(|s| s == 200.0)
    }

    /// What this payload means to the session.
    pub fn classify(&self) -> ControlMessage {
        let Some(value) = self.as_json() else {
            return ControlMessage::Response;
        };
        match self.category() {
            Some(category) if IGNORED_CATEGORIES.contains(&category) => {
                ControlMessage::Ignored(category.to_owned())
            }
            Some("Conn") => match value.get(1).map(ConnInfo::deserialize) {
                Some(Ok(info)) => ControlMessage::Authentication(info),
                _ => ControlMessage::Authentication(ConnInfo::default()),
            },
            Some("Cmd") => {
                let body = value.get(1);
                let is_challenge = body
                    .and_then(|b| b.get("type"))
                    .and_then(Value::as_str)
                    == Some("challenge");
                match body.and_then(|b| b.get("challenge")).and_then(Value::as_str) {
                    Some(challenge) if is_challenge => {
                        ControlMessage::Challenge(challenge.to_owned())
                    }
                    _ => ControlMessage::Response,
                }
            }
            _ => ControlMessage::Response,
        }
    }
}

/// Body of a `Conn` control message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnInfo {
    #[serde(default)]
    pub server_token: Option<String>,
    #[serde(default)]
    pub client_token: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub wid: Option<String>,
    #[serde(default)]
    pub pushname: Option<String>,
}

/// What a control frame means to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Ignored(String),
    Authentication(ConnInfo),
    /// Base64 nonce to sign.
    Challenge(String),
    /// Anything else, routed to the correlator.
    Response,
}

/// A classified incoming transport message.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingFrame {
    HeartbeatAck,
    Control { tag: String, payload: ControlPayload },
    Encrypted { tag: String, body: Bytes },
}

impl IncomingFrame {
    pub fn parse(message: WireMessage) -> Result<Self> {
        match message {
            WireMessage::Text(text) => Self::parse_text(&text),
            WireMessage::Binary(data) => Self::parse_binary(data),
        }
    }

    fn parse_text(text: &str) -> Result<Self> {
        if is_heartbeat_ack(text) {
            return Ok(IncomingFrame::HeartbeatAck);
        }
        let (tag, rest) = text
            .split_once(',')
            .ok_or(ProtocolError::MalformedFrame(constants::ERR_FRAME_NO_SEPARATOR))?;
        Ok(IncomingFrame::Control {
            tag: tag.to_owned(),
            payload: ControlPayload::parse(rest),
        })
    }

    fn parse_binary(data: Bytes) -> Result<Self> {
        let separator = data
            .iter()
            .position(|&b| b == b',')
            .ok_or(ProtocolError::MalformedFrame(constants::ERR_FRAME_NO_SEPARATOR))?;
        let tag = String::from_utf8_lossy(&data[..separator]).into_owned();
        Ok(IncomingFrame::Encrypted {
            tag,
            body: data.slice(separator + 1..),
        })
    }
}

fn is_heartbeat_ack(text: &str) -> bool {
    text.strip_prefix('!')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// `<tag>,<json>` text of an outgoing control request.
pub fn control_request(tag: &str, body: &Value) -> String {
    format!("{tag},{body}")
}

/// `<tag>,<body>` bytes of an outgoing encrypted frame.
pub fn encrypted_frame(tag: &str, body: &[u8]) -> Bytes {
    let mut frame = Vec::with_capacity(tag.len() + 1 + body.len());
    frame.extend_from_slice(tag.as_bytes());
    frame.push(b',');
    frame.extend_from_slice(body);
    Bytes::from(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_heartbeat_ack() {
        assert_eq!(
            IncomingFrame::parse(WireMessage::Text("!1690000000".into())).unwrap(),
            IncomingFrame::HeartbeatAck
        );
        assert!(!is_heartbeat_ack("!"));
        assert!(!is_heartbeat_ack("!12a"));
    }

    #[test]
    fn test_control_frame_keeps_commas_in_payload() {
        let frame =
            IncomingFrame::parse(WireMessage::Text(r#"1--0,{"status":200,"ref":"a,b"}"#.into()))
                .unwrap();
        let IncomingFrame::Control { tag, payload } = frame else {
            panic!("expected control frame");
        };
        assert_eq!(tag, "1--0");
        assert!(payload.is_success());
        assert_eq!(payload.as_json().unwrap()["ref"], "a,b");
    }

    #[test]
    fn test_raw_payload_when_not_json() {
        let frame = IncomingFrame::parse(WireMessage::Text("s1,not json".into())).unwrap();
        assert_eq!(
            frame,
            IncomingFrame::Control {
                tag: "s1".into(),
                payload: ControlPayload::Raw("not json".into())
            }
        );
    }

    #[test]
    fn test_missing_separator() {
        assert!(matches!(
            IncomingFrame::parse(WireMessage::Text("garbage".into())),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(matches!(
            IncomingFrame::parse(WireMessage::Binary(Bytes::from_static(b"nosep"))),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_binary_frame_split() {
        let frame = IncomingFrame::parse(WireMessage::Binary(encrypted_frame("7--3", &[1, 44, 2])))
            .unwrap();
        assert_eq!(
            frame,
            IncomingFrame::Encrypted {
                tag: "7--3".into(),
                body: Bytes::from_static(&[1, 44, 2])
            }
        );
    }

    #[test]
    fn test_status_as_string_or_number() {
        assert!(ControlPayload::Json(json!({"status": "200"})).is_success());
        assert!(!ControlPayload::Json(json!({"status": 401})).is_success());
        assert_eq!(
            ControlPayload::Json(json!({"status": 401})).status().as_deref(),
            Some("401")
        );
        assert!(!ControlPayload::Raw("200".into()).is_success());
    }

    #[test]
    fn test_classify() {
        let ignored = ControlPayload::Json(json!(["Props", {"imageMaxKBytes": 1024}]));
        assert_eq!(ignored.classify(), ControlMessage::Ignored("Props".into()));

        let conn = ControlPayload::Json(json!(["Conn", {
            "serverToken": "s", "clientToken": "c", "secret": "x", "wid": "1@c.us"
        }]));
        let ControlMessage::Authentication(info) = conn.classify() else {
            panic!("expected authentication");
        };
        assert_eq!(info.server_token.as_deref(), Some("s"));
        assert_eq!(info.wid.as_deref(), Some("1@c.us"));

        let challenge = ControlPayload::Json(json!(["Cmd", {"type": "challenge", "challenge": "AQID"}]));
        assert_eq!(challenge.classify(), ControlMessage::Challenge("AQID".into()));

        let other_cmd = ControlPayload::Json(json!(["Cmd", {"type": "disconnect"}]));
        assert_eq!(other_cmd.classify(), ControlMessage::Response);

        let response = ControlPayload::Json(json!({"status": 200}));
        assert_eq!(response.classify(), ControlMessage::Response);
    }
}
