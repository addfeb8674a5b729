// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use reqwest::header::{CONTENT_RANGE, RANGE};
use std::pin::Pin;
use std::sync::Arc;

use crate::error::HttpError;

/// A streaming response body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// HTTP response with status, length information, and body stream
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Content-Length header value, if present
    pub content_length: Option<u64>,
    /// First byte position from a Content-Range header, if present
    pub range_start: Option<u64>,
    /// Full resource length from a Content-Range header, if present
    pub total_length: Option<u64>,
    /// Response body as a stream of bytes
    pub body: ByteStream,
}

/// HTTP client abstraction for testability
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Fetch the entire response body as bytes, failing on non-success status
    async fn get_bytes(&self, url: &str) -> Result<Bytes, HttpError>;

    /// Get a streaming response for large downloads, starting at `offset`
    ///
    /// A non-zero offset is sent as a `Range` request. The caller inspects the
    /// status to learn whether the server honoured it.
    async fn get_stream(&self, url: &str, offset: u64) -> Result<HttpResponse, HttpError>;
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    async fn get_bytes(&self, url: &str) -> Result<Bytes, HttpError> {
        (**self).get_bytes(url).await
    }

    async fn get_stream(&self, url: &str, offset: u64) -> Result<HttpResponse, HttpError> {
        (**self).get_stream(url, offset).await
    }
}

/// Default HTTP client implementation using reqwest
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Create a new ReqwestClient with default settings
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a new ReqwestClient with a custom reqwest::Client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get_bytes(&self, url: &str) -> Result<Bytes, HttpError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?)
    }

    async fn get_stream(&self, url: &str, offset: u64) -> Result<HttpResponse, HttpError> {
        use futures::StreamExt;

        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let content_length = response.content_length();
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range);
        let range_start = content_range.map(|(start, _)| start);
        let total_length = content_range.and_then(|(_, total)| total);

        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|result| result.map_err(std::io::Error::other)),
        );

        Ok(HttpResponse {
            status,
            content_length,
            range_start,
            total_length,
            body,
        })
    }
}

/// Split a `Content-Range: bytes a-b/total` value into `a` and `total`
///
/// An unknown total (`*`) yields `None` for the second element.
pub fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let (unit, range) = value.trim().split_once(' ')?;
    if !unit.eq_ignore_ascii_case("bytes") {
        return None;
    }
    let (span, total) = range.split_once('/')?;
    let (start, _) = span.split_once('-')?;
    Some((start.trim().parse().ok()?, total.trim().parse().ok()))
}
