use serde::{Deserialize, Serialize};

/// One entry of the model listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTag {
    /// Identifier to pass back as `selectedModel`.
    pub name: String,

    /// Model identifier, when the server reports it separately from the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Size of the model in bytes, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ModelTag {
    /// Create a tag with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: None,
            size: None,
        }
    }
}

/// Response of `GET /api/tags`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelListResponse {
    /// Available models.
    #[serde(default)]
    pub models: Vec<ModelTag>,
}

impl ModelListResponse {
    /// Names of the available models, in server order.
    pub fn names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }
}
