use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::{
    domain::{AudioMetadata, ConversationKey, Message, MessageBody, MessageId, SenderRole},
    protocol::{GatewayEnvelope, RawAudio, RawGatewayMessage, RawMessageContent},
};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    pub key: ConversationKey,
    /// Counterparty display name; never set for own-side messages.
    pub contact_name: Option<String>,
    pub message: Message,
}

/// Recognized payload layouts, checked in declaration order.
#[derive(Debug)]
enum PayloadShape<'a> {
    BareList(&'a [Value]),
    MessagesList(&'a [Value]),
    MessagesRecords(&'a [Value]),
    Records(&'a [Value]),
    Single(&'a Value),
}

impl<'a> PayloadShape<'a> {
    fn detect(data: &'a Value) -> Option<Self> {
        if let Value::Array(items) = data {
            return Some(Self::BareList(items));
        }
        let object = data.as_object()?;
        if let Some(Value::Array(items)) = object.get("messages") {
            return Some(Self::MessagesList(items));
        }
        if let Some(Value::Array(items)) = object.get("messages").and_then(|m| m.get("records")) {
            return Some(Self::MessagesRecords(items));
        }
        if let Some(Value::Array(items)) = object.get("records") {
            return Some(Self::Records(items));
        }
        if object
            .get("key")
            .and_then(|key| key.get("remoteJid"))
            .is_some()
        {
            return Some(Self::Single(data));
        }
        None
    }

    fn name(&self) -> &'static str {
        match self {
            Self::BareList(_) => "bare_list",
            Self::MessagesList(_) => "messages_list",
            Self::MessagesRecords(_) => "messages_records",
            Self::Records(_) => "records",
            Self::Single(_) => "single",
        }
    }

    fn items(&self) -> Vec<&'a Value> {
        match self {
            Self::BareList(items)
            | Self::MessagesList(items)
            | Self::MessagesRecords(items)
            | Self::Records(items) => items.iter().collect(),
            Self::Single(item) => vec![*item],
        }
    }
}

pub fn normalize_envelope(envelope: &GatewayEnvelope) -> Vec<NormalizedMessage> {
    if !envelope.kind().carries_messages() {
        debug!(event = %envelope.event, "normalizer: ignoring event without messages");
        return Vec::new();
    }
    let fallback_time = envelope
        .date_time
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc));
    normalize_payload(&envelope.data, fallback_time, envelope.instance.as_deref())
}

pub fn normalize_payload(
    data: &Value,
    fallback_time: Option<DateTime<Utc>>,
    instance: Option<&str>,
) -> Vec<NormalizedMessage> {
    let Some(shape) = PayloadShape::detect(data) else {
        warn!(
            payload_kind = json_kind(data),
            "normalizer: dropping payload with unrecognized shape"
        );
        return Vec::new();
    };
    debug!(shape = shape.name(), "normalizer: payload shape matched");

    shape
        .items()
        .into_iter()
        .filter_map(|item| normalize_item(item, fallback_time, instance))
        .collect()
}

fn normalize_item(
    item: &Value,
    fallback_time: Option<DateTime<Utc>>,
    instance: Option<&str>,
) -> Option<NormalizedMessage> {
    let raw = match serde_json::from_value::<RawGatewayMessage>(item.clone()) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, "normalizer: dropping malformed message record");
            return None;
        }
    };

    let Some(address) = raw.key.remote_jid.as_deref() else {
        warn!("normalizer: dropping message without remote address");
        return None;
    };
    let Some(key) = ConversationKey::from_address(address) else {
        debug!(address, "normalizer: dropping broadcast or empty address");
        return None;
    };
    let Some(id) = raw.key.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) else {
        warn!(conversation = %key, "normalizer: dropping message without id");
        return None;
    };

    let from_me = raw.key.from_me.unwrap_or(false);
    let contact_name = if from_me {
        None
    } else {
        raw.push_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    };
    let timestamp = raw
        .message_timestamp
        .as_ref()
        .and_then(timestamp_from_value)
        .or(fallback_time)
        .unwrap_or_else(Utc::now);
    let body = raw
        .message
        .as_ref()
        .map(resolve_body)
        .unwrap_or(MessageBody::Unsupported);

    Some(NormalizedMessage {
        key,
        contact_name,
        message: Message {
            id: MessageId(id.to_string()),
            sender: SenderRole::from_me(from_me),
            body,
            timestamp,
            instance: raw
                .instance_id
                .or_else(|| instance.map(str::to_string)),
        },
    })
}

pub fn resolve_body(content: &RawMessageContent) -> MessageBody {
    if let Some(text) = non_empty(content.conversation.as_deref()) {
        return MessageBody::text(text);
    }
    if let Some(text) = content
        .extended_text_message
        .as_ref()
        .and_then(|m| non_empty(m.text.as_deref()))
    {
        return MessageBody::text(text);
    }
    if let Some(image) = &content.image_message {
        return MessageBody::Image {
            caption: non_empty(image.caption.as_deref()).map(str::to_string),
        };
    }
    if let Some(video) = &content.video_message {
        return MessageBody::Video {
            caption: non_empty(video.caption.as_deref()).map(str::to_string),
        };
    }
    if let Some(document) = &content.document_message {
        let file_name = non_empty(document.file_name.as_deref())
            .or_else(|| non_empty(document.title.as_deref()))
            .map(str::to_string);
        return MessageBody::Document { file_name };
    }
    if let Some(wrapper) = &content.document_with_caption_message {
        let inner = wrapper.pointer("/message/documentMessage");
        let file_name = inner
            .and_then(|doc| doc.get("fileName").or_else(|| doc.get("caption")))
            .and_then(Value::as_str)
            .and_then(|name| non_empty(Some(name)))
            .map(str::to_string);
        return MessageBody::Document { file_name };
    }
    if let Some(audio) = &content.audio_message {
        return MessageBody::Audio {
            audio: audio_metadata(audio),
        };
    }
    if content.location_message.is_some() || content.live_location_message.is_some() {
        return MessageBody::Location;
    }
    if content.contact_message.is_some() || content.contacts_array_message.is_some() {
        return MessageBody::Contact;
    }
    if content.sticker_message.is_some() {
        return MessageBody::Sticker;
    }
    MessageBody::Unsupported
}

fn audio_metadata(audio: &RawAudio) -> AudioMetadata {
    AudioMetadata {
        duration_seconds: audio.seconds.as_ref().and_then(|value| match value {
            Value::Number(n) => n.as_u64().and_then(|secs| u32::try_from(secs).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }),
        push_to_talk: audio.ptt.unwrap_or(false),
        media_url: audio.url.clone(),
        mime_type: audio.mimetype.clone(),
    }
}

/// Gateway timestamps are epoch seconds, as a number, a numeric string or a
/// `{low, high}` long. Values large enough to be milliseconds are accepted.
fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    let raw = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        Value::Object(map) => map.get("low")?.as_i64()?,
        _ => return None,
    };
    if raw <= 0 {
        return None;
    }
    if raw >= 1_000_000_000_000 {
        DateTime::from_timestamp_millis(raw)
    } else {
        DateTime::from_timestamp(raw, 0)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[path = "tests/normalizer_tests.rs"]
mod tests;
