use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(TenantId);
id_newtype!(MessageId);
id_newtype!(OperatorId);

/// Prefix of ids given to own-side messages before the gateway assigns one.
pub const LOCAL_ID_PREFIX: &str = "local-";

impl MessageId {
    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }
}

pub const CONTACT_DOMAIN: &str = "s.whatsapp.net";
const LEGACY_CONTACT_DOMAIN: &str = "c.us";
const BROADCAST_ADDRESS: &str = "status@broadcast";

/// Stable conversation identity derived from a contact address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn from_address(address: &str) -> Option<Self> {
        let address = address.trim();
        if address.is_empty() || address.eq_ignore_ascii_case(BROADCAST_ADDRESS) {
            return None;
        }

        let (user, domain) = match address.split_once('@') {
            Some((user, domain)) => (user, domain),
            None => (address, CONTACT_DOMAIN),
        };
        // Multi-device addresses carry a `:device` suffix on the user part.
        let user = user.split(':').next().unwrap_or(user);

        let domain = if domain.eq_ignore_ascii_case(LEGACY_CONTACT_DOMAIN) {
            CONTACT_DOMAIN
        } else {
            domain
        };

        let user = if domain == CONTACT_DOMAIN {
            user.chars().filter(char::is_ascii_digit).collect::<String>()
        } else {
            user.to_string()
        };
        if user.is_empty() {
            return None;
        }

        Some(Self(format!("{user}@{}", domain.to_ascii_lowercase())))
    }

    pub fn phone(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    /// Sent by the operator's own gateway instance.
    OwnSide,
    Counterparty,
}

impl SenderRole {
    pub fn from_me(from_me: bool) -> Self {
        if from_me {
            Self::OwnSide
        } else {
            Self::Counterparty
        }
    }

    pub fn is_self(self) -> bool {
        matches!(self, Self::OwnSide)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    pub duration_seconds: Option<u32>,
    pub push_to_talk: bool,
    pub media_url: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    Image { caption: Option<String> },
    Video { caption: Option<String> },
    Document { file_name: Option<String> },
    Audio { audio: AudioMetadata },
    Location,
    Contact,
    Sticker,
    Unsupported,
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Video { .. } => "video",
            Self::Document { .. } => "document",
            Self::Audio { .. } => "audio",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::Sticker => "sticker",
            Self::Unsupported => "unknown",
        }
    }

    /// Flat content string: plain text verbatim, media as `[kind] detail`.
    pub fn content(&self) -> String {
        let tagged = |detail: Option<&str>| match detail.map(str::trim).filter(|d| !d.is_empty()) {
            Some(detail) => format!("[{}] {detail}", self.kind()),
            None => format!("[{}]", self.kind()),
        };
        match self {
            Self::Text { text } => text.clone(),
            Self::Image { caption } | Self::Video { caption } => tagged(caption.as_deref()),
            Self::Document { file_name } => tagged(file_name.as_deref()),
            Self::Audio { .. } | Self::Location | Self::Contact | Self::Sticker => tagged(None),
            Self::Unsupported => "[media]".to_string(),
        }
    }

    pub fn audio(&self) -> Option<&AudioMetadata> {
        match self {
            Self::Audio { audio } => Some(audio),
            _ => None,
        }
    }

    /// Rebuilds a body from durable columns. Captions and file names survive
    /// through the bracketed content; audio metadata is passed separately.
    pub fn from_stored(kind: &str, content: &str, audio: Option<AudioMetadata>) -> Self {
        let detail = || {
            content
                .split_once(']')
                .map(|(_, rest)| rest.trim().to_string())
                .filter(|rest| !rest.is_empty())
        };
        match kind {
            "image" => Self::Image { caption: detail() },
            "video" => Self::Video { caption: detail() },
            "document" => Self::Document { file_name: detail() },
            "audio" => Self::Audio {
                audio: audio.unwrap_or_default(),
            },
            "location" => Self::Location,
            "contact" => Self::Contact,
            "sticker" => Self::Sticker,
            "unknown" => Self::Unsupported,
            _ => Self::text(content),
        }
    }
}

/// Derives a `message_type` from flat content the way older clients did:
/// a leading `[tag]` names the type, anything else is text.
pub fn message_type_from_content(content: &str) -> String {
    content
        .strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
        .map(|(tag, _)| tag.to_string())
        .filter(|tag| !tag.is_empty())
        .unwrap_or_else(|| "text".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: SenderRole,
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StatusTag {
    #[default]
    Waiting,
    Attending,
    Pending,
    Finished,
}

impl StatusTag {
    pub const ALL: [StatusTag; 4] = [
        StatusTag::Waiting,
        StatusTag::Attending,
        StatusTag::Pending,
        StatusTag::Finished,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Attending => "attending",
            Self::Pending => "pending",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatusTag(pub String);

impl fmt::Display for UnknownStatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status tag '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatusTag {}

impl FromStr for StatusTag {
    type Err = UnknownStatusTag;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        // Legacy rows carry the Portuguese tab labels.
        match value.trim().to_lowercase().as_str() {
            "waiting" | "aguardando" => Ok(Self::Waiting),
            "attending" | "atendendo" | "em atendimento" => Ok(Self::Attending),
            "pending" | "pendente" | "pendentes" => Ok(Self::Pending),
            "finished" | "finalizado" | "finalizados" | "finalizadas" => Ok(Self::Finished),
            _ => Err(UnknownStatusTag(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenState {
    Open,
    Closed,
}

impl OpenState {
    pub fn from_flag(is_open: bool) -> Self {
        if is_open {
            Self::Open
        } else {
            Self::Closed
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub key: ConversationKey,
    pub display_name: String,
    pub contact_address: String,
    pub messages: Vec<Message>,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub status: StatusTag,
    pub open_state: OpenState,
    pub unread: u32,
    pub sector: Option<String>,
    pub avatar_url: Option<String>,
}

impl Conversation {
    pub fn new(key: ConversationKey, display_name: Option<&str>) -> Self {
        let contact_address = key.phone().to_string();
        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| contact_address.clone());
        Self {
            key,
            display_name,
            contact_address,
            messages: Vec::new(),
            last_message_preview: None,
            last_message_at: None,
            status: StatusTag::default(),
            open_state: OpenState::Closed,
            unread: 0,
            sector: None,
            avatar_url: None,
        }
    }

    pub fn contains_message(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|message| &message.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_url: Option<String>,
    pub api_key: String,
    pub instance_name: String,
}

impl GatewayConfig {
    pub fn is_complete(&self) -> bool {
        !self.base_url.trim().is_empty()
            && !self.api_key.trim().is_empty()
            && !self.instance_name.trim().is_empty()
    }

    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStatusRecord {
    pub tenant_id: TenantId,
    pub phone: String,
    pub conversation_key: ConversationKey,
    pub contact_name: Option<String>,
    pub status: StatusTag,
    pub is_open: bool,
    pub unread_count: u32,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub sector: Option<String>,
    pub scroll_position: Option<i64>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
