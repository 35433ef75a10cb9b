use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Messages sent from a viewer to the daemon.
///
/// On the wire these are JSON objects keyed by `action`, e.g.
/// `{"action":"next"}` or `{"action":"speed","value":2}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Command {
    Next,
    Previous,
    Pause,
    Play,
    Speed { value: f64 },
}

/// Wire shape of an inbound command before the speed value is validated.
#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum RawCommand {
    Next,
    Previous,
    Pause,
    Play,
    Speed { value: SpeedValue },
}

/// Older viewer pages send the speed as a string ("2"), newer ones as a number.
#[derive(Deserialize)]
#[serde(untagged)]
enum SpeedValue {
    Number(f64),
    Text(String),
}

impl Command {
    /// Decode one text frame from a viewer.
    ///
    /// Unknown actions and non-numeric speeds are rejected. A speed that is
    /// numeric but not positive decodes fine; the core ignores it.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawCommand = serde_json::from_str(text)?;
        let cmd = match raw {
            RawCommand::Next => Command::Next,
            RawCommand::Previous => Command::Previous,
            RawCommand::Pause => Command::Pause,
            RawCommand::Play => Command::Play,
            RawCommand::Speed { value } => {
                let value = match value {
                    SpeedValue::Number(v) => v,
                    SpeedValue::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                        ProtocolError::MalformedCommand(format!("non-numeric speed {:?}", s))
                    })?,
                };
                if !value.is_finite() {
                    return Err(ProtocolError::MalformedCommand(format!(
                        "speed must be finite, got {}",
                        value
                    )));
                }
                Command::Speed { value }
            }
        };
        Ok(cmd)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages pushed from the daemon to every viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Slide change. `content_type` is only resolved when cast support is on.
    Slide {
        url: String,
        #[serde(rename = "content-type", default)]
        content_type: Option<String>,
    },
    Notice(Notice),
}

/// Playback notices, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Notice {
    Pause,
    Play,
    Speed { speed: f64 },
    Source { source: String },
    Title { title: String },
}

impl ServerMessage {
    pub fn slide(url: impl Into<String>, content_type: Option<String>) -> Self {
        ServerMessage::Slide {
            url: url.into(),
            content_type,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl From<Notice> for ServerMessage {
    fn from(notice: Notice) -> Self {
        ServerMessage::Notice(notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_simple_actions() {
        assert_eq!(Command::decode(r#"{"action":"next"}"#).unwrap(), Command::Next);
        assert_eq!(
            Command::decode(r#"{"action":"previous"}"#).unwrap(),
            Command::Previous
        );
        assert_eq!(Command::decode(r#"{"action":"pause"}"#).unwrap(), Command::Pause);
        assert_eq!(Command::decode(r#"{"action":"play"}"#).unwrap(), Command::Play);
    }

    #[test]
    fn test_decode_speed_number_and_string() {
        assert_eq!(
            Command::decode(r#"{"action":"speed","value":2}"#).unwrap(),
            Command::Speed { value: 2.0 }
        );
        assert_eq!(
            Command::decode(r#"{"action":"speed","value":"0.5"}"#).unwrap(),
            Command::Speed { value: 0.5 }
        );
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(Command::decode(r#"{"action":"rewind"}"#).is_err());
        assert!(Command::decode(r#"{"action":"speed","value":"fast"}"#).is_err());
        assert!(Command::decode(r#"{"action":"speed","value":"inf"}"#).is_err());
        assert!(Command::decode(r#"{"action":"speed"}"#).is_err());
        assert!(Command::decode(r#"{"value":2}"#).is_err());
        assert!(Command::decode("not json").is_err());
    }

    #[test]
    fn test_non_positive_speed_still_decodes() {
        assert_eq!(
            Command::decode(r#"{"action":"speed","value":-1}"#).unwrap(),
            Command::Speed { value: -1.0 }
        );
    }

    #[test]
    fn test_server_message_wire_format() {
        let slide = ServerMessage::slide("http://x/a.jpg", Some("image/jpeg".into()));
        assert_eq!(
            slide.encode().unwrap(),
            r#"{"url":"http://x/a.jpg","content-type":"image/jpeg"}"#
        );

        let no_type = ServerMessage::slide("http://x/a.jpg", None);
        assert_eq!(
            no_type.encode().unwrap(),
            r#"{"url":"http://x/a.jpg","content-type":null}"#
        );

        let pause: ServerMessage = Notice::Pause.into();
        assert_eq!(pause.encode().unwrap(), r#"{"action":"pause"}"#);

        let speed: ServerMessage = Notice::Speed { speed: 2.0 }.into();
        assert_eq!(speed.encode().unwrap(), r#"{"action":"speed","speed":2.0}"#);

        let title: ServerMessage = Notice::Title {
            title: "Holiday".into(),
        }
        .into();
        assert_eq!(
            title.encode().unwrap(),
            r#"{"action":"title","title":"Holiday"}"#
        );
    }

    #[test]
    fn test_server_message_decode_picks_variant() {
        match ServerMessage::decode(r#"{"action":"source","source":"http://album"}"#).unwrap() {
            ServerMessage::Notice(Notice::Source { source }) => assert_eq!(source, "http://album"),
            other => panic!("Wrong message type: {:?}", other),
        }
        match ServerMessage::decode(r#"{"url":"u"}"#).unwrap() {
            ServerMessage::Slide { url, content_type } => {
                assert_eq!(url, "u");
                assert!(content_type.is_none());
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }
}
