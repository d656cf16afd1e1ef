use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity of a turn within one transcript. Assigned by the
/// transcript on insertion and never reused for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TurnId(pub u64);

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "model",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            // The upstream API spells the assistant role "model".
            "model" | "assistant" => Ok(Role::Assistant),
            _ => Err(format!("invalid turn role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// User verdict on a settled turn. Absence (`Option::None` on the turn)
/// is the third state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Like,
    Dislike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Audio,
}

impl AttachmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Audio => "audio",
        }
    }
}

/// Media carried alongside a turn's text. Fixed at creation.
///
/// `data_uri` is the API-transportable payload (`data:<mime>;base64,...`);
/// `preview` is whatever local reference the presentation layer uses to show
/// the attachment (a file path for images, a synthetic label for recordings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub preview: String,
    pub data_uri: String,
    pub mime_type: String,
}

impl Attachment {
    pub fn from_bytes(
        kind: AttachmentKind,
        preview: impl Into<String>,
        bytes: &[u8],
        mime_type: impl Into<String>,
    ) -> Self {
        let mime_type = mime_type.into();
        Self {
            kind,
            preview: preview.into(),
            data_uri: crate::utils::encode::encode_data_uri(bytes, &mime_type),
            mime_type,
        }
    }
}

/// Value snapshot of a quoted turn, captured when the user starts a reply.
/// Deliberately not a reference: later edits to the quoted turn (e.g. a
/// still-streaming assistant reply growing) must not alter the quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyContext {
    pub turn_id: TurnId,
    pub snippet: String,
    pub from_user: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_context: Option<ReplyContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction: Option<Reaction>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forwarded: bool,
}

impl Turn {
    fn new(id: TurnId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            timestamp: Utc::now(),
            streaming: false,
            attachment: None,
            reply_context: None,
            reaction: None,
            forwarded: false,
        }
    }

    /// A user turn is created complete and never mutated again.
    pub fn user(
        id: TurnId,
        content: impl Into<String>,
        attachment: Option<Attachment>,
        reply_context: Option<ReplyContext>,
    ) -> Self {
        Self {
            attachment,
            reply_context,
            ..Self::new(id, Role::User, content)
        }
    }

    /// Placeholder the stream consumer fills in chunk by chunk.
    pub fn assistant_placeholder(id: TurnId) -> Self {
        Self {
            streaming: true,
            ..Self::new(id, Role::Assistant, "")
        }
    }

    /// Settled assistant turn, used for app-authored notices like the
    /// transport-failure apology.
    pub fn assistant(id: TurnId, content: impl Into<String>) -> Self {
        Self::new(id, Role::Assistant, content)
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }

    /// A turn is settled once its content can no longer change.
    pub fn is_settled(&self) -> bool {
        !self.streaming
    }
}
