//! User turn content.

use serde::{Deserialize, Serialize};

/// Source of an inline image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageSource {
    /// Encoding of `data`; always `base64` today.
    #[serde(rename = "type")]
    pub kind: String,
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    /// Encoded image bytes.
    pub data: String,
}

/// One part of a multimodal user message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// Text content.
        text: String,
    },
    /// Inline image.
    Image {
        /// Image payload.
        source: ImageSource,
    },
}

impl ContentPart {
    /// A text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// A base64-encoded image part.
    #[must_use]
    pub fn image_base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Image {
            source: ImageSource {
                kind: "base64".to_owned(),
                media_type: media_type.into(),
                data: data.into(),
            },
        }
    }
}

/// Content of one user turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum UserMessage {
    /// Plain text turn.
    Text(String),
    /// Multimodal turn.
    Parts(Vec<ContentPart>),
}

impl UserMessage {
    /// Whether the message carries no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

impl From<&str> for UserMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for UserMessage {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<ContentPart>> for UserMessage {
    fn from(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }
}
