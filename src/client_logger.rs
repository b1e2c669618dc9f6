//! Logging trait for chat client operations.
//!
//! This module provides the [`ClientLogger`] trait that allows users to capture
//! and log every request passing through the [`ChatClient`](crate::ChatClient) and
//! every fragment streamed back.

use crate::{ChatRequest, Error};

/// A trait for logging chat client operations.
///
/// # Example
///
/// ```rust,ignore
/// use rolechat::{ChatRequest, ClientLogger, Error};
/// use std::io::Write;
/// use std::sync::Mutex;
///
/// struct FileLogger {
///     file: Mutex<std::fs::File>,
/// }
///
/// impl ClientLogger for FileLogger {
///     fn log_request(&self, request: &ChatRequest) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "request: {}", serde_json::to_string(request).unwrap()).unwrap();
///     }
///
///     fn log_fragment(&self, fragment: &str) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "fragment: {fragment:?}").unwrap();
///     }
/// }
/// ```
pub trait ClientLogger: Send + Sync {
    /// Log an outgoing chat request, just before it is sent.
    fn log_request(&self, request: &ChatRequest);

    /// Log one text fragment as it arrives.
    fn log_fragment(&self, fragment: &str);

    /// Log the end of a stream that closed normally.
    fn log_stream_complete(&self, fragments: usize) {
        _ = fragments;
    }

    /// Log a failed request or a stream that ended in an error.
    fn log_error(&self, error: &Error) {
        _ = error;
    }
}
