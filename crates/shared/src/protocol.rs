use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub action: String,
    pub instance: String,
}

impl SubscribeRequest {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            action: "subscribe".to_string(),
            instance: instance.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEnvelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl GatewayEnvelope {
    pub fn kind(&self) -> RealtimeEventKind {
        RealtimeEventKind::from_event_name(&self.event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEventKind {
    MessagesUpsert,
    MessagesSet,
    SendMessage,
    ConnectionUpdate,
    Subscribed,
    Other(String),
}

impl RealtimeEventKind {
    pub fn from_event_name(name: &str) -> Self {
        match canonical_event_name(name).as_str() {
            "messages.upsert" => Self::MessagesUpsert,
            "messages.set" => Self::MessagesSet,
            "send.message" => Self::SendMessage,
            "connection.update" => Self::ConnectionUpdate,
            "subscribed" => Self::Subscribed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn carries_messages(&self) -> bool {
        matches!(
            self,
            Self::MessagesUpsert | Self::MessagesSet | Self::SendMessage
        )
    }
}

/// `MESSAGES_UPSERT`, `messages.upsert` and `Messages_Upsert` name the same event.
pub fn canonical_event_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('_', ".")
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("frame array is empty or its first element is not an event name")]
    MissingEventName,
    #[error("frame has unsupported shape")]
    UnsupportedShape,
}

/// Parses a push-channel text frame.
pub fn parse_realtime_frame(text: &str) -> Result<GatewayEnvelope, FrameError> {
    let value: Value = serde_json::from_str(text)?;
    envelope_from_value(value)
}

pub fn envelope_from_value(value: Value) -> Result<GatewayEnvelope, FrameError> {
    match value {
        Value::Array(mut items) => {
            if items.is_empty() {
                return Err(FrameError::MissingEventName);
            }
            let Value::String(event) = items.remove(0) else {
                return Err(FrameError::MissingEventName);
            };
            let payload = if items.is_empty() {
                Value::Null
            } else {
                items.remove(0)
            };
            match payload {
                Value::Object(ref map) if map.contains_key("event") && map.contains_key("data") => {
                    let mut envelope: GatewayEnvelope = serde_json::from_value(payload)?;
                    if envelope.event.trim().is_empty() {
                        envelope.event = event;
                    }
                    Ok(envelope)
                }
                data => Ok(GatewayEnvelope {
                    event,
                    instance: None,
                    date_time: None,
                    data,
                }),
            }
        }
        Value::Object(ref map) if map.contains_key("event") => Ok(serde_json::from_value(value)?),
        _ => Err(FrameError::UnsupportedShape),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessageKey {
    #[serde(default)]
    pub remote_jid: Option<String>,
    #[serde(default)]
    pub from_me: Option<bool>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTextContent {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCaptionedMedia {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDocument {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAudio {
    #[serde(default)]
    pub seconds: Option<Value>,
    #[serde(default)]
    pub ptt: Option<bool>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

/// Content variants the gateway may attach to a message. Exactly one is
/// normally present; unknown variants are ignored by serde.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessageContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<RawTextContent>,
    #[serde(default)]
    pub image_message: Option<RawCaptionedMedia>,
    #[serde(default)]
    pub video_message: Option<RawCaptionedMedia>,
    #[serde(default)]
    pub document_message: Option<RawDocument>,
    #[serde(default)]
    pub document_with_caption_message: Option<Value>,
    #[serde(default)]
    pub audio_message: Option<RawAudio>,
    #[serde(default)]
    pub location_message: Option<Value>,
    #[serde(default)]
    pub live_location_message: Option<Value>,
    #[serde(default)]
    pub contact_message: Option<Value>,
    #[serde(default)]
    pub contacts_array_message: Option<Value>,
    #[serde(default)]
    pub sticker_message: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGatewayMessage {
    pub key: RawMessageKey,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub message: Option<RawMessageContent>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub message_timestamp: Option<Value>,
    #[serde(default)]
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextOptions {
    pub delay: u32,
    pub presence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextBody {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextRequest {
    pub number: String,
    pub options: SendTextOptions,
    pub text_message: SendTextBody,
}

impl SendTextRequest {
    pub fn new(number: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            options: SendTextOptions {
                delay: 1200,
                presence: "composing".to_string(),
            },
            text_message: SendTextBody { text: text.into() },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendTextResponse {
    #[serde(default)]
    pub key: Option<RawMessageKey>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionInstance {
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionStateResponse {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub instance: Option<ConnectionInstance>,
}

impl ConnectionStateResponse {
    pub fn is_connected(&self) -> bool {
        let state = self
            .state
            .as_deref()
            .or_else(|| self.instance.as_ref().and_then(|i| i.state.as_deref()));
        matches!(state, Some("open") | Some("connected"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilePictureRequest {
    pub number: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePictureResponse {
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default)]
    pub picture_url: Option<String>,
}

impl ProfilePictureResponse {
    pub fn url(self) -> Option<String> {
        self.profile_picture_url
            .or(self.picture_url)
            .filter(|url| !url.trim().is_empty())
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
