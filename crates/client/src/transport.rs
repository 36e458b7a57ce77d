use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};

use crate::error::ClientError;
use crate::frame::{FrameDecoder, ServerFrame};

/// Frames read from one open event stream.
///
/// Ends when the server closes the connection. An `Err` item means the
/// connection broke.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<ServerFrame, ClientError>> + Send>>;

/// Opens the server-push event stream.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Resolves once the server has accepted the stream.
    async fn open(&self) -> Result<FrameStream, ClientError>;
}

/// [`StreamTransport`] over a long-lived HTTP `GET`.
pub struct HttpStreamTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpStreamTransport {
    /// * `url` - Full stream URL, e.g. `http://host:3000/api/v1/search-status/stream`.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Reuse an existing [`reqwest::Client`]. It must not carry a total
    /// request timeout or the stream is cut when it fires.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    async fn open(&self) -> Result<FrameStream, ClientError> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let response = ClientError::ensure_success(response).await?;
        tracing::debug!(url = %self.url, "Event stream opened");

        let body = Box::pin(response.bytes_stream());
        let state = (body, FrameDecoder::new(), VecDeque::new());

        let frames = futures::stream::unfold(state, |(mut body, mut decoder, mut pending)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((Ok(frame), (body, decoder, pending)));
                }
                match body.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                    Some(Err(e)) => return Some((Err(ClientError::Http(e)), (body, decoder, pending))),
                    None => return None,
                }
            }
        });

        Ok(Box::pin(frames))
    }
}
