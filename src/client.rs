use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client_logger::ClientLogger;
use crate::error::{Error, Result};
use crate::observability::{
    CLIENT_MODEL_LIST_ERRORS, CLIENT_MODEL_LISTS, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS,
    STREAM_DURATION, STREAM_ERRORS, STREAM_FRAGMENTS, STREAM_TTFB,
};
use crate::stream::{StreamFormat, TextStream, text_stream};
use crate::types::{ChatRequest, ModelListResponse};

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/";

/// Environment variable that overrides [`DEFAULT_BASE_URL`].
pub const BASE_URL_ENV: &str = "ROLECHAT_BASE_URL";

/// Models that accept image input unless configured otherwise.
pub const DEFAULT_VISION_MODELS: &[&str] = &["gemini-pro-vision"];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

///////////////////////////////////////////// ChatBackend ////////////////////////////////////////////

/// Source of streamed chat responses.
///
/// [`ChatClient`] is the production implementation; conversations only see this trait.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send one chat request and return its response as a fragment stream.
    ///
    /// The stream must end with an abort error once `cancel` fires.
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<TextStream>;

    /// Whether `model` accepts image parts.
    fn supports_vision(&self, model: &str) -> bool {
        DEFAULT_VISION_MODELS.contains(&model)
    }
}

////////////////////////////////////////////// ChatClient ////////////////////////////////////////////

/// Client for the chat server's `/api/chat` and `/api/tags` endpoints.
#[derive(Clone)]
pub struct ChatClient {
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
    format: StreamFormat,
    vision_models: Vec<String>,
    logger: Option<Arc<dyn ClientLogger>>,
}

impl ChatClient {
    /// Create a new client.
    ///
    /// The base URL can be provided directly or read from the ROLECHAT_BASE_URL
    /// environment variable; it defaults to [`DEFAULT_BASE_URL`].
    pub fn new(base_url: Option<String>) -> Result<Self> {
        Self::with_options(base_url, None, None)
    }

    /// Create a new client with custom settings.
    pub fn with_options(
        base_url: Option<String>,
        timeout: Option<Duration>,
        format: Option<StreamFormat>,
    ) -> Result<Self> {
        let base_url = match base_url {
            Some(url) => url,
            None => env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        };
        let base_url = parse_base_url(&base_url)?;

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        // Only the connection is bounded here: a response may legitimately stream for longer
        // than the timeout.
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            base_url,
            timeout,
            format: format.unwrap_or_default(),
            vision_models: DEFAULT_VISION_MODELS.iter().map(|m| m.to_string()).collect(),
            logger: None,
        })
    }

    /// Replace the list of models that accept images.
    pub fn with_vision_models(mut self, models: Vec<String>) -> Self {
        self.vision_models = models;
        self
    }

    /// Attach a logger that sees every request and fragment.
    pub fn with_logger(mut self, logger: Arc<dyn ClientLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// The base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The configured response format.
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {}", e),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
        }
    }

    /// Process API response errors and convert to our Error type.
    ///
    /// The chat route answers failures with a plain-text body, which becomes the message.
    async fn process_error_response(response: Response) -> Error {
        let status = response.status();
        let status_code = status.as_u16();

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };
        let message = match error_body.trim() {
            "" => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
            body => body.to_string(),
        };

        match status_code {
            404 => Error::not_found(message, Some("endpoint".to_string()), None),
            408 => Error::timeout(message, None),
            500 => Error::internal_server(message),
            502..=504 => Error::service_unavailable(message),
            _ => Error::api(status_code, message),
        }
    }

    /// Send a chat request and get its response as a stream of text fragments.
    ///
    /// The returned stream yields each fragment as soon as it is decoded.  Cancelling `cancel`
    /// before the response arrives fails with an abort error; cancelling afterwards ends the
    /// stream with one.
    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<TextStream> {
        CLIENT_REQUESTS.click();
        if let Some(logger) = &self.logger {
            logger.log_request(request);
        }

        let url = self.endpoint("api/chat")?;
        let send = self
            .client
            .post(url)
            .headers(self.default_headers())
            .json(request)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::abort("request cancelled")),
            response = send => response.map_err(|e| self.map_send_error(e)),
        };
        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                let err = Self::process_error_response(response).await;
                return self.request_failed(err);
            }
            Err(err) => return self.request_failed(err),
        };

        let start = Instant::now();
        let bytes = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });
        Ok(self.observe(text_stream(bytes, self.format, cancel), start))
    }

    fn request_failed<T>(&self, err: Error) -> Result<T> {
        CLIENT_REQUEST_ERRORS.click();
        if let Some(logger) = &self.logger {
            logger.log_error(&err);
        }
        Err(err)
    }

    /// Wrap a fragment stream with metrics and logging.
    fn observe(&self, inner: TextStream, start: Instant) -> TextStream {
        let logger = self.logger.clone();
        Box::pin(stream::unfold(
            (inner, logger, 0usize, false),
            move |(mut inner, logger, seen, failed)| async move {
                match inner.next().await {
                    Some(Ok(fragment)) => {
                        if seen == 0 {
                            STREAM_TTFB.add(start.elapsed().as_secs_f64());
                        }
                        STREAM_FRAGMENTS.click();
                        if let Some(logger) = &logger {
                            logger.log_fragment(&fragment);
                        }
                        Some((Ok(fragment), (inner, logger, seen + 1, failed)))
                    }
                    Some(Err(err)) => {
                        STREAM_ERRORS.click();
                        if let Some(logger) = &logger {
                            logger.log_error(&err);
                        }
                        Some((Err(err), (inner, logger, seen, true)))
                    }
                    None => {
                        STREAM_DURATION.add(start.elapsed().as_secs_f64());
                        if let (Some(logger), false) = (&logger, failed) {
                            logger.log_stream_complete(seen);
                        }
                        None
                    }
                }
            },
        ))
    }

    /// Fetch the model listing.
    pub async fn try_list_models(&self) -> Result<ModelListResponse> {
        CLIENT_MODEL_LISTS.click();
        let url = self.endpoint("api/tags")?;
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        response.json::<ModelListResponse>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse model list: {}", e),
                Some(Box::new(e)),
            )
        })
    }

    /// Names of the available models.
    ///
    /// Any failure, including a malformed body, yields an empty list: a missing model list
    /// must never break the session.
    pub async fn list_models(&self) -> Vec<String> {
        match self.try_list_models().await {
            Ok(response) => response.names(),
            Err(err) => {
                CLIENT_MODEL_LIST_ERRORS.click();
                if let Some(logger) = &self.logger {
                    logger.log_error(&err);
                }
                Vec::new()
            }
        }
    }
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("format", &self.format)
            .field("vision_models", &self.vision_models)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

#[async_trait::async_trait]
impl ChatBackend for ChatClient {
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<TextStream> {
        ChatClient::stream_chat(self, request, cancel).await
    }

    fn supports_vision(&self, model: &str) -> bool {
        self.vision_models.iter().any(|m| m == model)
    }
}

/// Parse a base URL, making sure relative endpoints resolve beneath it.
fn parse_base_url(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url.trim())?;
    if url.cannot_be_a_base() {
        return Err(Error::url(
            format!("{base_url} cannot be used as a base URL"),
            None,
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ChatClient::new(Some("http://localhost:8080".to_string())).unwrap();
        assert_eq!(client.base_url.as_str(), "http://localhost:8080/");
        assert_eq!(client.timeout, DEFAULT_TIMEOUT);
        assert_eq!(client.format, StreamFormat::DataStream);

        let client = ChatClient::with_options(
            Some("https://chat.example.com/app".to_string()),
            Some(Duration::from_secs(30)),
            Some(StreamFormat::Text),
        )
        .unwrap();
        assert_eq!(client.base_url.as_str(), "https://chat.example.com/app/");
        assert_eq!(client.timeout, Duration::from_secs(30));
        assert_eq!(client.format(), StreamFormat::Text);
    }

    #[test]
    fn endpoints_resolve_under_base_path() {
        let client = ChatClient::new(Some("https://chat.example.com/app".to_string())).unwrap();
        assert_eq!(
            client.endpoint("api/chat").unwrap().as_str(),
            "https://chat.example.com/app/api/chat"
        );
        assert_eq!(
            client.endpoint("api/tags").unwrap().as_str(),
            "https://chat.example.com/app/api/tags"
        );
    }

    #[test]
    fn invalid_base_url() {
        assert!(ChatClient::new(Some("not a url".to_string())).is_err());
        assert!(ChatClient::new(Some("mailto:someone@example.com".to_string())).is_err());
    }

    #[test]
    fn vision_models_are_configurable() {
        let client = ChatClient::new(Some(DEFAULT_BASE_URL.to_string())).unwrap();
        assert!(ChatBackend::supports_vision(&client, "gemini-pro-vision"));
        assert!(!ChatBackend::supports_vision(&client, "gemini-pro"));

        let client = client.with_vision_models(vec!["llava".to_string()]);
        assert!(ChatBackend::supports_vision(&client, "llava"));
        assert!(!ChatBackend::supports_vision(&client, "gemini-pro-vision"));
    }

    #[tokio::test]
    async fn unreachable_server_lists_no_models() {
        // Port 9 (discard) on localhost is essentially never listening.
        let client = ChatClient::with_options(
            Some("http://127.0.0.1:9/".to_string()),
            Some(Duration::from_secs(2)),
            None,
        )
        .unwrap();
        assert!(client.list_models().await.is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_send_is_an_abort() {
        let client = ChatClient::new(Some("http://127.0.0.1:9/".to_string())).unwrap();
        let request = ChatRequest::build(
            &[crate::types::Message::user("hi")],
            "s",
            None,
            "m",
            false,
        )
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.stream_chat(&request, cancel).await.err().unwrap();
        assert!(err.is_abort());
    }
}
