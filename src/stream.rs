//! Decoding of streamed chat responses.
//!
//! The server answers a chat request with a chunked body in one of two shapes (see
//! [`StreamFormat`]).  Both are turned into a lazy sequence of text fragments that yields each
//! fragment as soon as its bytes are complete, ends when the body ends, and ends early with one
//! error when the transport fails, the server reports an error, or the caller cancels.

use std::pin::Pin;
use std::str::FromStr;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::observability::STREAM_BYTES;
use crate::types::StreamPart;
use crate::{Error, Result};

/// A finite, non-restartable sequence of response text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Wire shape of the response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamFormat {
    /// Newline-delimited `<code>:<json>` parts.
    #[default]
    DataStream,
    /// Raw text; every chunk is a fragment.
    Text,
}

impl FromStr for StreamFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "data" | "data-stream" => Ok(StreamFormat::DataStream),
            "text" | "plain" => Ok(StreamFormat::Text),
            _ => Err(Error::validation(
                format!("Invalid stream format: {s}. Valid options: data, text"),
                Some("stream_format".to_string()),
            )),
        }
    }
}

/// Turn a response body into a cancellable fragment stream.
pub fn text_stream<S>(byte_stream: S, format: StreamFormat, cancel: CancellationToken) -> TextStream
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin + 'static,
{
    match format {
        StreamFormat::DataStream => Box::pin(cancellable(
            Box::pin(data_stream_fragments(byte_stream)),
            cancel,
        )),
        StreamFormat::Text => Box::pin(cancellable(
            Box::pin(plain_text_fragments(byte_stream)),
            cancel,
        )),
    }
}

/// Process a body in the data stream protocol into its parts.
///
/// Lines are split on raw bytes before decoding, so a multi-byte character split across two
/// network chunks is reassembled rather than rejected.
pub fn process_data_stream<S>(byte_stream: S) -> impl Stream<Item = Result<StreamPart>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    stream::unfold(
        (byte_stream, Vec::new(), false, false),
        |(mut stream, mut buffer, mut eof, failed)| async move {
            // Nothing after a transport error; the tail of the buffer is not a real line.
            if failed {
                return None;
            }
            loop {
                // First check if we have a complete line in the buffer
                if let Some(line) = next_line(&mut buffer) {
                    match decode_line(&line) {
                        Ok(Some(part)) => return Some((Ok(part), (stream, buffer, eof, false))),
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), (stream, buffer, eof, false))),
                    }
                }

                if eof {
                    // A final line without its newline.
                    if buffer.is_empty() {
                        return None;
                    }
                    let line = std::mem::take(&mut buffer);
                    return match decode_line(&line) {
                        Ok(Some(part)) => Some((Ok(part), (stream, buffer, eof, false))),
                        Ok(None) => None,
                        Err(e) => Some((Err(e), (stream, buffer, eof, false))),
                    };
                }

                // Read more data
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        buffer.extend_from_slice(&bytes);
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, buffer, true, true)));
                    }
                    None => {
                        eof = true;
                    }
                }
            }
        },
    )
}

/// Text fragments of a data stream body.
///
/// Text parts become fragments, a finish part ends the sequence, an error part ends it with
/// an error, and every other part is skipped.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use futures::{StreamExt, stream};
/// use rolechat::stream::data_stream_fragments;
///
/// # tokio_test::block_on(async {
/// let body = stream::iter(vec![Ok(Bytes::from_static(
///     b"f:{\"messageId\":\"m1\"}\n0:\"Hi\"\n0:\" there\"\nd:{}\n",
/// ))]);
/// let fragments: Vec<String> = data_stream_fragments(body)
///     .map(|fragment| fragment.unwrap())
///     .collect()
///     .await;
/// assert_eq!(fragments, vec!["Hi", " there"]);
/// # });
/// ```
pub fn data_stream_fragments<S>(byte_stream: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let parts = Box::pin(process_data_stream(byte_stream));
    stream::unfold((parts, false), |(mut parts, finished)| async move {
        if finished {
            return None;
        }
        loop {
            match parts.next().await? {
                Ok(StreamPart::Text(text)) if text.is_empty() => continue,
                Ok(StreamPart::Text(text)) => return Some((Ok(text), (parts, false))),
                Ok(StreamPart::Error(message)) => {
                    return Some((Err(Error::streaming(message, None)), (parts, true)));
                }
                Ok(StreamPart::Finish(_)) => return None,
                Ok(StreamPart::Other { .. }) => continue,
                Err(e) => return Some((Err(e), (parts, true))),
            }
        }
    })
}

/// Text fragments of a plain text body.
pub fn plain_text_fragments<S>(byte_stream: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    stream::unfold(
        (byte_stream, Vec::new(), false),
        |(mut stream, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        buffer.extend_from_slice(&bytes);
                        match take_utf8(&mut buffer) {
                            Ok(Some(text)) => return Some((Ok(text), (stream, buffer, false))),
                            Ok(None) => continue,
                            Err(e) => return Some((Err(e), (stream, buffer, true))),
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), (stream, buffer, true))),
                    None if buffer.is_empty() => return None,
                    None => {
                        return Some((
                            Err(Error::encoding("stream ended inside a UTF-8 sequence", None)),
                            (stream, buffer, true),
                        ));
                    }
                }
            }
        },
    )
}

/// End `inner` with one abort error as soon as `cancel` fires.
pub fn cancellable<S>(inner: S, cancel: CancellationToken) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<String>> + Unpin,
{
    stream::unfold((inner, cancel, false), |(mut inner, cancel, done)| async move {
        if done {
            return None;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Some((Err(Error::abort("request cancelled")), (inner, cancel, true)))
            }
            item = inner.next() => item.map(|item| (item, (inner, cancel, false))),
        }
    })
}

fn next_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = buffer.iter().position(|b| *b == b'\n')?;
    let mut line: Vec<u8> = buffer.drain(..=pos).collect();
    line.pop();
    Some(line)
}

fn decode_line(line: &[u8]) -> Result<Option<StreamPart>> {
    let line = std::str::from_utf8(line)?;
    StreamPart::parse_line(line)
}

/// Take the longest complete UTF-8 prefix out of `buffer`.
fn take_utf8(buffer: &mut Vec<u8>) -> Result<Option<String>> {
    let valid = match std::str::from_utf8(buffer) {
        Ok(_) => buffer.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(e) => return Err(e.into()),
    };
    if valid == 0 {
        return Ok(None);
    }
    let rest = buffer.split_off(valid);
    let complete = std::mem::replace(buffer, rest);
    let text = String::from_utf8(complete).map_err(|e| {
        Error::encoding(format!("Invalid UTF-8 in stream: {e}"), Some(Box::new(e)))
    })?;
    Ok(Some(text))
}
