//! Server-sent-event change stream.
//!
//! Opens the server's `text/event-stream` endpoint and yields classified
//! [`StreamMessage`]s. Reconnection is NOT handled here: the stream simply
//! ends (or yields one error) and the caller decides what happens next.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//! use mdtsync_api::sse::SseClient;
//! use mdtsync_api::transport::TransportConfig;
//!
//! let url = "http://localhost:3001/api/events".parse()?;
//! let client = SseClient::new(url, &TransportConfig::default())?;
//! let mut messages = client.connect().await?;
//!
//! while let Some(message) = messages.next().await {
//!     println!("{:?}", message?);
//! }
//! ```

use bytes::{Buf, BytesMut};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use url::Url;

use crate::error::Error;
use crate::models::StreamMessage;
use crate::transport::TransportConfig;

/// Stream of decoded messages from one live connection.
pub type MessageStream = BoxStream<'static, Result<StreamMessage, Error>>;

// ── SseClient ────────────────────────────────────────────────────────

/// Connects to the change-notification stream.
#[derive(Clone)]
pub struct SseClient {
    http: reqwest::Client,
    url: Url,
}

impl SseClient {
    pub fn new(url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_stream_client()?;
        Ok(Self { http, url })
    }

    pub fn with_client(http: reqwest::Client, url: Url) -> Self {
        Self { http, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Perform the handshake and return the live message stream.
    ///
    /// A non-2xx answer or a refused connection is a handshake failure.
    /// Once connected, frames that are not valid JSON envelopes are logged
    /// and skipped; a broken body yields a single [`Error::StreamRead`]
    /// and then the stream ends.
    pub async fn connect(&self) -> Result<MessageStream, Error> {
        tracing::info!(url = %self.url, "Connecting to event stream");

        let resp = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| Error::StreamConnect(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::StreamConnect(format!("HTTP {status}")));
        }

        tracing::info!("Event stream connected");

        let mut body = resp.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(chunk) => {
                        for frame in decoder.feed(&chunk) {
                            match StreamMessage::parse(&frame.data) {
                                Ok(message) => yield Ok(message),
                                Err(e) => {
                                    tracing::debug!(error = %e, "Skipping malformed stream frame");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(Error::StreamRead(e.to_string()));
                        break;
                    }
                }
            }
            tracing::info!("Event stream ended");
        };

        Ok(stream.boxed())
    }
}

// ── Frame decoding ───────────────────────────────────────────────────

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Longest line the decoder holds on to. A longer line is discarded along
/// with the rest of its event.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Incremental `text/event-stream` decoder.
///
/// Bytes are buffered until a full line is available, so chunk boundaries
/// may fall anywhere (including inside a UTF-8 sequence).
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    /// Prefix of `buffer` already searched for a newline.
    scanned: usize,
    /// Skipping the tail of an oversized line.
    discarding: bool,
    /// The current event lost a line and must not be dispatched.
    truncated: bool,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk of bytes, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n')
            else {
                if self.buffer.len() > MAX_LINE_BYTES {
                    if !self.discarding {
                        tracing::debug!(
                            limit = MAX_LINE_BYTES,
                            "discarding oversized event-stream line"
                        );
                    }
                    self.buffer.clear();
                    self.discarding = true;
                    self.truncated = true;
                }
                self.scanned = self.buffer.len();
                break;
            };

            let pos = self.scanned + offset;
            let line = self.buffer.split_to(pos);
            self.buffer.advance(1);
            self.scanned = 0;

            if std::mem::take(&mut self.discarding) || pos > MAX_LINE_BYTES {
                self.truncated = true;
                continue;
            }

            let line = String::from_utf8_lossy(&line);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }

        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_owned()),
            "event" => self.event = Some(value.to_owned()),
            // `id` and `retry` are irrelevant without server-side replay
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if std::mem::take(&mut self.truncated) {
            tracing::debug!(event = ?event, "dropping event with an oversized line");
            self.data.clear();
            return None;
        }
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}

// ── Tests ────────────────────────────────────────────────────────────
