// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builders shared by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::HttpError;
use crate::feed::{EpisodeRecord, SeriesStream, derive_series_id};
use crate::http::{ByteStream, HttpClient, HttpResponse};

pub fn record(guid: &str, title: &str) -> EpisodeRecord {
    EpisodeRecord {
        episode_guid: guid.to_string(),
        series_id: "0000000000000000".to_string(),
        season: None,
        episode_number: None,
        title: title.to_string(),
        publish_date: None,
        audio_url: Url::parse(&format!("https://example.com/{guid}.mp3")).unwrap(),
        audio_mime: Some("audio/mpeg".to_string()),
        audio_length: None,
        shownotes: None,
        artwork_url: None,
        link: None,
        hosts: Vec::new(),
        guests: Vec::new(),
        feed_position: 1,
    }
}

pub fn series_of(title: &str, episodes: Vec<EpisodeRecord>) -> SeriesStream {
    SeriesStream {
        series_id: derive_series_id("https://example.com/feed.xml", title),
        series_title: title.to_string(),
        artwork_url: None,
        hosts: Vec::new(),
        episodes,
    }
}

/// HTTP double serving fixed bodies per URL
///
/// Unknown URLs answer 404. Every request is recorded.
#[derive(Default)]
pub struct MockHttpClient {
    bodies: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<(String, u64)>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    /// (url, offset) of every request made so far
    pub fn requests(&self) -> Vec<(String, u64)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, url: &str) -> usize {
        self.requests().iter().filter(|(u, _)| u == url).count()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get_bytes(&self, url: &str) -> Result<Bytes, HttpError> {
        self.requests.lock().unwrap().push((url.to_string(), 0));
        match self.bodies.get(url) {
            Some(body) => Ok(Bytes::from(body.clone())),
            None => Err(HttpError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }

    async fn get_stream(&self, url: &str, offset: u64) -> Result<HttpResponse, HttpError> {
        self.requests.lock().unwrap().push((url.to_string(), offset));
        let Some(body) = self.bodies.get(url) else {
            return Ok(HttpResponse {
                status: 404,
                content_length: None,
                range_start: None,
                total_length: None,
                body: Box::pin(futures::stream::empty()),
            });
        };

        let total = body.len() as u64;
        let (status, data) = if offset > 0 && offset < total {
            (206, body[offset as usize..].to_vec())
        } else {
            (200, body.clone())
        };
        let len = data.len() as u64;

        let stream: ByteStream =
            Box::pin(futures::stream::once(async move { Ok(Bytes::from(data)) }));

        Ok(HttpResponse {
            status,
            content_length: Some(len),
            range_start: (status == 206).then_some(offset),
            total_length: (status == 206).then_some(total),
            body: stream,
        })
    }
}
