use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Cmd,
}

impl MessageKind {
    /// Anything other than `"cmd"` is typed as text.
    fn parse(kind: Option<&str>) -> Self {
        match kind.map(str::trim) {
            Some("cmd") => MessageKind::Cmd,
            _ => MessageKind::Text,
        }
    }
}

/// The `(type, text)` shape both transports reduce a client message to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub kind: MessageKind,
    pub text: String,
}

/// Body of `POST /send` and of JSON WebSocket frames.
#[derive(Debug, Default, Deserialize)]
pub struct SendPayload {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub string: Option<Value>,
}

impl SendPayload {
    pub fn into_message(self) -> IncomingMessage {
        let text = match self.string {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
        };
        IncomingMessage {
            kind: MessageKind::parse(self.kind.as_deref()),
            text,
        }
    }
}

impl IncomingMessage {
    /// `None` for blank frames. Frames that do not parse as a JSON object
    /// are typed verbatim.
    pub fn from_frame(frame: &str) -> Option<Self> {
        let frame = frame.trim();
        if frame.is_empty() {
            return None;
        }

        if frame.starts_with('{') {
            if let Ok(payload) = serde_json::from_str::<SendPayload>(frame) {
                return Some(payload.into_message());
            }
        }

        Some(Self {
            kind: MessageKind::Text,
            text: frame.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CmdResultFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub string: String,
    pub ok: bool,
    pub message: String,
}

impl CmdResultFrame {
    pub fn new(string: String, ok: bool, message: String) -> Self {
        Self {
            kind: "cmd_result",
            string,
            ok,
            message,
        }
    }
}
