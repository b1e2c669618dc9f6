//! Configuration for the chat shell.
//!
//! Command-line arguments are parsed with `arrrg` into [`ChatArgs`] and resolved, together with
//! the environment, into a [`ChatConfig`].

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::client::DEFAULT_VISION_MODELS;
use crate::error::Result;
use crate::stream::StreamFormat;

/// Environment variable naming the state file.
pub const STATE_FILE_ENV: &str = "ROLECHAT_STATE_FILE";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Command-line arguments for the rolechat shell.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Base URL of the chat server.
    #[arrrg(optional, "Chat server base URL (default: $ROLECHAT_BASE_URL or http://localhost:3000/)", "URL")]
    pub base_url: Option<String>,

    /// Model to select at startup.
    #[arrrg(optional, "Model to use; persisted as the selected model", "MODEL")]
    pub model: Option<String>,

    /// Where the store is persisted.
    #[arrrg(optional, "State file (default: $ROLECHAT_STATE_FILE or the user data dir)", "PATH")]
    pub state_file: Option<String>,

    /// YAML file of prompt overrides.
    #[arrrg(optional, "YAML file with role prompt overrides", "FILE")]
    pub prompts: Option<String>,

    /// Connection timeout in seconds.
    #[arrrg(optional, "Request timeout in seconds (default: 60)", "SECS")]
    pub timeout_secs: Option<u64>,

    /// Comma-separated models that accept images.
    #[arrrg(optional, "Comma-separated models that accept images (default: gemini-pro-vision)", "MODELS")]
    pub vision_models: Option<String>,

    /// Expect plain text bodies instead of the data stream protocol.
    #[arrrg(flag, "Server streams plain text instead of data stream parts")]
    pub text_stream: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Resolved configuration for the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Server base URL; `None` defers to the client's environment lookup.
    pub base_url: Option<String>,

    /// Model to select at startup, if given.
    pub model: Option<String>,

    /// Path of the persisted store.
    pub state_file: PathBuf,

    /// Prompt override file, if any.
    pub prompts_file: Option<PathBuf>,

    /// Connection timeout.
    pub timeout: Duration,

    /// Response body format.
    pub stream_format: StreamFormat,

    /// Models that accept image parts.
    pub vision_models: Vec<String>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - State file: [`default_state_file`]
    /// - Timeout: 60 seconds
    /// - Stream format: data stream
    /// - Vision models: gemini-pro-vision
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            base_url: None,
            model: None,
            state_file: default_state_file(),
            prompts_file: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            stream_format: StreamFormat::DataStream,
            vision_models: DEFAULT_VISION_MODELS.iter().map(|m| m.to_string()).collect(),
            use_color: true,
        }
    }

    /// Sets the server base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the startup model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the state file.
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = path.into();
        self
    }

    /// Sets the prompt override file.
    pub fn with_prompts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.prompts_file = Some(path.into());
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the response format.
    pub fn with_stream_format(mut self, format: StreamFormat) -> Self {
        self.stream_format = format;
        self
    }

    /// Sets the models that accept images.
    pub fn with_vision_models(mut self, models: Vec<String>) -> Self {
        self.vision_models = models;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Build the client this configuration describes.
    pub fn client(&self) -> Result<crate::ChatClient> {
        Ok(crate::ChatClient::with_options(
            self.base_url.clone(),
            Some(self.timeout),
            Some(self.stream_format),
        )?
        .with_vision_models(self.vision_models.clone()))
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        let defaults = ChatConfig::new();
        let vision_models = match args.vision_models {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect(),
            None => defaults.vision_models.clone(),
        };

        ChatConfig {
            base_url: args.base_url,
            model: args.model,
            state_file: args
                .state_file
                .map(PathBuf::from)
                .unwrap_or(defaults.state_file),
            prompts_file: args.prompts.map(PathBuf::from),
            timeout: args
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            stream_format: if args.text_stream {
                StreamFormat::Text
            } else {
                StreamFormat::DataStream
            },
            vision_models,
            use_color: !args.no_color,
        }
    }
}

/// Where the store lives when no path is given.
///
/// `$ROLECHAT_STATE_FILE` wins; otherwise `rolechat/state.json` under the user's data
/// directory, or the working directory when there is none.
pub fn default_state_file() -> PathBuf {
    if let Ok(path) = env::var(STATE_FILE_ENV)
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }
    dirs::data_dir()
        .map(|dir| dir.join("rolechat").join("state.json"))
        .unwrap_or_else(|| PathBuf::from("rolechat-state.json"))
}
