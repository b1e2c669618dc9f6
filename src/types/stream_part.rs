use serde_json::Value;

use crate::{Error, Result};

/// One line of the data stream protocol.
///
/// Each line has the shape `<code>:<json>`.  Only text, error and finish parts matter to a chat
/// client; everything else is carried through as [`StreamPart::Other`] and skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPart {
    /// Code `0`: a text fragment.
    Text(String),

    /// Code `3`: the server failed while generating.
    Error(String),

    /// Code `d`: the response is complete.
    Finish(Value),

    /// Any other part: step markers, usage, annotations and the like.
    Other {
        /// The part code.
        code: String,
        /// The decoded payload.
        value: Value,
    },
}

impl StreamPart {
    /// Parse one line (without its trailing newline).
    ///
    /// Returns `Ok(None)` for blank lines.
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return Ok(None);
        }
        let Some((code, payload)) = line.split_once(':') else {
            return Err(Error::serialization(
                format!("Malformed stream part: missing ':' separator in '{line}'"),
                None,
            ));
        };
        let part = match code {
            "0" => StreamPart::Text(serde_json::from_str::<String>(payload)?),
            "3" => StreamPart::Error(serde_json::from_str::<String>(payload)?),
            "d" => StreamPart::Finish(serde_json::from_str::<Value>(payload)?),
            _ => StreamPart::Other {
                code: code.to_string(),
                value: serde_json::from_str::<Value>(payload)?,
            },
        };
        Ok(Some(part))
    }

    /// The text of a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StreamPart::Text(text) => Some(text),
            _ => None,
        }
    }
}
