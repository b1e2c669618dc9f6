use serde::{Deserialize, Serialize};

use crate::types::{Message, MessageRole};

/// One part of a multi-part message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    /// Text part.  Always present on the final user message, possibly empty.
    Text {
        /// The text.
        text: String,
    },

    /// Image part, referenced by URL.
    Image {
        /// The image URL.
        image: String,
    },
}

/// Content of a normalized message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoreContent {
    /// Plain text content.
    Text(String),

    /// A sequence of parts.
    Parts(Vec<ContentPart>),
}

/// A message reduced to the role/content form the server expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreMessage {
    /// Author of the message.
    pub role: MessageRole,

    /// Content of the message.
    pub content: CoreContent,
}

impl From<&Message> for CoreMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: CoreContent::Text(message.content.clone()),
        }
    }
}

/// Extra request data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {
    /// Image URLs sent with the final message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Opaque model identifier.
    #[serde(rename = "selectedModel")]
    pub selected_model: String,

    /// The resolved system prompt.
    pub system: String,

    /// The role key the prompt was resolved from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Prior history followed by the final user turn.
    pub messages: Vec<CoreMessage>,

    /// Extra data for the final turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RequestData>,
}

impl ChatRequest {
    /// Build the request for a turn.
    ///
    /// All messages but the last are normalized to text form.  The last one becomes a part
    /// array that starts with an explicit text part and, when `vision` is set, carries one image
    /// part per attachment.  Returns `None` for an empty history.
    pub fn build(
        history: &[Message],
        system: impl Into<String>,
        role: Option<&str>,
        model: impl Into<String>,
        vision: bool,
    ) -> Option<Self> {
        let (last, prior) = history.split_last()?;
        let mut messages: Vec<CoreMessage> = prior.iter().map(CoreMessage::from).collect();

        let mut parts = vec![ContentPart::Text {
            text: last.content.clone(),
        }];
        let images = if vision { last.image_urls() } else { Vec::new() };
        parts.extend(images.iter().map(|url| ContentPart::Image { image: url.clone() }));
        messages.push(CoreMessage {
            role: MessageRole::User,
            content: CoreContent::Parts(parts),
        });

        let data = if images.is_empty() {
            None
        } else {
            Some(RequestData { images })
        };

        Some(Self {
            selected_model: model.into(),
            system: system.into(),
            role: role.map(String::from),
            messages,
            data,
        })
    }

    /// Number of image parts in the final message.
    pub fn image_count(&self) -> usize {
        self.data.as_ref().map(|d| d.images.len()).unwrap_or(0)
    }
}
