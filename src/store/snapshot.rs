//! The persisted subset of the store and its versioned envelope.
//!
//! The blob has the shape `{"state": {...}, "version": N}`.  Version 0 is the layout written
//! before prompt editing was persisted; its prompt table is replaced by the shipped one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::prompts::SystemPromptTable;
use crate::types::ChatSession;

/// Version written by this build.
pub const CURRENT_VERSION: u32 = 1;

/// Everything the store persists.  Pending attachments and in-flight turns are not part of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    /// Whether first-run onboarding has completed.
    #[serde(default)]
    pub is_initialized: bool,

    /// Sessions keyed by thread id.
    #[serde(default)]
    pub chats: BTreeMap<String, ChatSession>,

    /// The active thread.
    #[serde(default)]
    pub current_chat_id: Option<String>,

    /// Model id sent with every request.
    #[serde(default)]
    pub selected_model: Option<String>,

    /// Role to system prompt.
    #[serde(default)]
    pub system_prompt: SystemPromptTable,

    /// Display name of the local user.
    #[serde(default)]
    pub user_name: String,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    state: &'a PersistedState,
    version: u32,
}

#[derive(Deserialize)]
struct RawEnvelope {
    state: Value,
    #[serde(default)]
    version: u32,
}

/// Serialize `state` into a versioned blob.
pub fn encode(state: &PersistedState) -> Result<String> {
    let envelope = EnvelopeRef {
        state,
        version: CURRENT_VERSION,
    };
    serde_json::to_string(&envelope).map_err(|err| {
        Error::serialization("failed to serialize store state", Some(Box::new(err)))
    })
}

/// Parse a versioned blob, migrating older layouts.
pub fn decode(blob: &str) -> Result<PersistedState> {
    let raw: RawEnvelope = serde_json::from_str(blob).map_err(|err| {
        Error::serialization("failed to parse store state", Some(Box::new(err)))
    })?;
    if raw.version > CURRENT_VERSION {
        return Err(Error::validation(
            format!(
                "store state has version {} but this build only reads up to {}",
                raw.version, CURRENT_VERSION
            ),
            Some("version".to_string()),
        ));
    }
    let mut state: PersistedState = serde_json::from_value(raw.state).map_err(|err| {
        Error::serialization("failed to parse store state", Some(Box::new(err)))
    })?;
    if raw.version == 0 {
        state.system_prompt = SystemPromptTable::shipped();
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn encodes_camel_case_envelope() {
        let mut state = PersistedState {
            user_name: "Lan".to_string(),
            current_chat_id: Some("abc".to_string()),
            ..Default::default()
        };
        state.chats.insert(
            "abc".to_string(),
            ChatSession::new(Some("translator".to_string())),
        );
        let value: Value = serde_json::from_str(&encode(&state).unwrap()).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["state"]["userName"], "Lan");
        assert_eq!(value["state"]["currentChatId"], "abc");
        assert_eq!(value["state"]["isInitialized"], false);
        assert_eq!(value["state"]["chats"]["abc"]["role"], "translator");
        assert!(value["state"]["systemPrompt"]["default"].is_string());
    }

    #[test]
    fn decode_round_trips() {
        let mut state = PersistedState {
            is_initialized: true,
            selected_model: Some("gemini-pro".to_string()),
            ..Default::default()
        };
        state.system_prompt.update("developer", "Use Rust.");
        let mut session = ChatSession::new(None);
        session.messages.push(Message::user("Hello"));
        state.chats.insert("x".to_string(), session);

        let decoded = decode(&encode(&state).unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn version_zero_takes_shipped_prompts() {
        let blob = r#"{
            "state": {
                "isInitialized": true,
                "chats": {
                    "abc": {"messages": [], "createdAt": "2024-05-01T10:00:00.000Z", "role": "translator"}
                },
                "currentChatId": "abc",
                "selectedModel": "gemini-pro",
                "systemPrompt": {"developer": "stale"},
                "userName": "Lan"
            },
            "version": 0
        }"#;
        let state = decode(blob).unwrap();
        assert_eq!(state.system_prompt, SystemPromptTable::shipped());
        assert_eq!(state.chats["abc"].role.as_deref(), Some("translator"));
        assert_eq!(state.user_name, "Lan");
    }

    #[test]
    fn missing_version_is_version_zero() {
        let state = decode(r#"{"state": {"userName": "Lan"}}"#).unwrap();
        assert_eq!(state.user_name, "Lan");
        assert!(!state.is_initialized);
        assert!(state.chats.is_empty());
    }

    #[test]
    fn newer_version_is_rejected() {
        let err = decode(r#"{"state": {}, "version": 2}"#).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn corrupt_blob_is_a_serialization_error() {
        assert!(matches!(
            decode("{not json").unwrap_err(),
            Error::Serialization { .. }
        ));
        assert!(matches!(
            decode(r#"{"state": {"chats": 3}, "version": 1}"#).unwrap_err(),
            Error::Serialization { .. }
        ));
    }
}
