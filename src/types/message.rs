use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::utils;
use crate::{Error, Result};

/// Role of the author of a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Typed by the user.
    User,

    /// Produced by the model.
    Assistant,

    /// Instruction text.
    System,
}

impl MessageRole {
    /// The wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image attached to a user message.
///
/// The URL is usually a `data:` URL carrying the base64 image inline.  It is passed to the
/// server untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Where the image lives.
    pub url: String,

    /// MIME type, when known.
    #[serde(
        rename = "contentType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub content_type: Option<String>,
}

impl Attachment {
    /// Create an attachment for the given URL, inferring the content type of `data:` URLs.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let content_type = url
            .strip_prefix("data:")
            .and_then(|rest| rest.split([';', ',']).next())
            .filter(|mime| !mime.is_empty())
            .map(String::from);
        Self { url, content_type }
    }

    /// Load an image file into an inline `data:` URL attachment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content_type = match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .as_deref()
        {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => {
                return Err(Error::validation(
                    "Unsupported file extension. Must be jpeg, png, gif, or webp",
                    Some("image".to_string()),
                ));
            }
        };

        let buffer = std::fs::read(path)
            .map_err(|err| Error::io(format!("failed to read {}", path.display()), err))?;
        let data = base64::engine::general_purpose::STANDARD.encode(&buffer);

        Ok(Self {
            url: format!("data:{content_type};base64,{data}"),
            content_type: Some(content_type.to_string()),
        })
    }

    /// Interpret user input as an image: URLs are used as given, anything else is read from
    /// disk.
    pub fn resolve(input: &str) -> Result<Self> {
        let input = input.trim();
        if ["http://", "https://", "data:"]
            .iter()
            .any(|scheme| input.starts_with(scheme))
        {
            Ok(Self::new(input))
        } else {
            Self::from_file(input)
        }
    }
}

/// One message of a chat thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identity of the message within its thread.
    pub id: String,

    /// Who wrote it.
    pub role: MessageRole,

    /// Text of the message.
    pub content: String,

    /// When the message was created, if recorded.
    #[serde(
        rename = "createdAt",
        default,
        with = "crate::utils::time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,

    /// Images attached to the message.
    #[serde(
        rename = "experimental_attachments",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Create a message with a fresh id, stamped with the current time.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Some(utils::time::now()),
            attachments: Vec::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Replace the id of this message.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach images to this message.
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// URLs of the attached images.
    pub fn image_urls(&self) -> Vec<String> {
        self.attachments.iter().map(|a| a.url.clone()).collect()
    }
}
