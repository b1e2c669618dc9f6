use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::Message;
use crate::utils;

/// One conversation thread.
///
/// A session with a `role` is a role-preset thread whose requests use that role's system
/// prompt.  A session without one is an ad hoc thread and uses the default prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    /// Ordered history of the thread.
    pub messages: Vec<Message>,

    /// When the thread was first created.  Never changes afterwards.
    #[serde(rename = "createdAt", with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// Role the thread is bound to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl ChatSession {
    /// Create an empty session created now.
    pub fn new(role: Option<String>) -> Self {
        Self {
            messages: Vec::new(),
            created_at: utils::time::now(),
            role,
        }
    }

    /// True when the session is not bound to a role.
    pub fn is_ad_hoc(&self) -> bool {
        self.role.is_none()
    }

    /// The last message of the thread, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Content of the first message, used as the thread title.
    pub fn title(&self) -> &str {
        self.messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}
