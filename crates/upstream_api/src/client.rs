use std::collections::VecDeque;

use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Response};

use crate::config::UpstreamConfig;
use crate::error::{parse_error_message, parse_retry_after, UpstreamApiError};
use crate::events::{BodyFraming, TextStreamEvent};
use crate::headers::{build_headers, ACCEPT_JSON, ACCEPT_STREAM};
use crate::payload::{GenerateRequest, PageQuery, PageResponse};
use crate::sse::SseStreamParser;
use crate::url::{normalize_generation_url, normalize_items_url};

/// Decoded generation body. Dropping it closes the connection.
pub type TextStream = BoxStream<'static, Result<TextStreamEvent, UpstreamApiError>>;

#[derive(Debug)]
pub struct UpstreamClient {
    http: Client,
    config: UpstreamConfig,
    generation_endpoint: String,
    items_endpoint: String,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamApiError> {
        let generation_endpoint = normalize_generation_url(&config.base_url)?;
        let items_endpoint = normalize_items_url(&config.base_url)?;

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build().map_err(UpstreamApiError::from)?;

        Ok(Self {
            http,
            config,
            generation_endpoint,
            items_endpoint,
        })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn generation_endpoint(&self) -> &str {
        &self.generation_endpoint
    }

    pub fn items_endpoint(&self) -> &str {
        &self.items_endpoint
    }

    pub fn build_headers(&self, accept: &str) -> Result<HeaderMap, UpstreamApiError> {
        let headers = build_headers(&self.config, accept);
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                    UpstreamApiError::InvalidBaseUrl(format!("invalid header key: {key}"))
                })?,
                HeaderValue::from_str(&value).map_err(|_| {
                    UpstreamApiError::InvalidBaseUrl(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    /// Submits a prompt and returns its body as a lazy stream of events.
    ///
    /// Non-success statuses fail here, before any increment is produced.
    pub async fn open_generation(
        &self,
        request: &GenerateRequest,
    ) -> Result<TextStream, UpstreamApiError> {
        let response = self
            .http
            .post(&self.generation_endpoint)
            .headers(self.build_headers(ACCEPT_STREAM)?)
            .json(request)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let framing = BodyFraming::from_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
        );
        Ok(decode_body(response, framing))
    }

    pub async fn fetch_page(&self, query: PageQuery) -> Result<PageResponse, UpstreamApiError> {
        let response = self
            .http
            .get(&self.items_endpoint)
            .headers(self.build_headers(ACCEPT_JSON)?)
            .query(&query)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body = response.text().await?;

        serde_json::from_str::<PageResponse>(&body).map_err(UpstreamApiError::from)
    }
}

async fn ensure_success(response: Response) -> Result<Response, UpstreamApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_secs = parse_retry_after(
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok()),
    );
    let body = response.text().await.unwrap_or_default();
    Err(UpstreamApiError::Status {
        status,
        message: parse_error_message(status, &body),
        retry_after_secs,
    })
}

struct BodyDecoder {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    utf8: crate::utf8::Utf8ChunkDecoder,
    sse: Option<SseStreamParser>,
    queue: VecDeque<Result<TextStreamEvent, UpstreamApiError>>,
    done: bool,
}

impl BodyDecoder {
    fn ingest(&mut self, chunk: &[u8]) {
        match self.utf8.decode(chunk) {
            Ok(text) => self.push_text(text),
            Err(invalid) => {
                // Text decoded ahead of the bad sequence is still delivered.
                self.push_text(invalid.decoded);
                if !self.done {
                    self.fail(UpstreamApiError::InvalidUtf8(invalid.message));
                }
            }
        }
    }

    fn push_text(&mut self, text: String) {
        match self.sse.as_mut() {
            Some(parser) => {
                let events = parser.feed(&text);
                self.push_events(events);
            }
            None if !text.is_empty() => self.queue.push_back(Ok(TextStreamEvent::Delta { text })),
            None => {}
        }
    }

    fn finish(&mut self) {
        self.done = true;
        if let Err(message) = self.utf8.finish() {
            self.queue
                .push_back(Err(UpstreamApiError::InvalidUtf8(message)));
            return;
        }
        if let Some(parser) = self.sse.as_mut() {
            let events = parser.finish();
            self.push_events(events);
        }
    }

    fn push_events(&mut self, events: Vec<TextStreamEvent>) {
        for event in events {
            let terminal = event.is_terminal();
            self.queue.push_back(Ok(event));
            if terminal {
                // Anything after an explicit terminal event is ignored.
                self.done = true;
                return;
            }
        }
    }

    fn fail(&mut self, error: UpstreamApiError) {
        self.done = true;
        self.queue.push_back(Err(error));
    }
}

fn decode_body(response: Response, framing: BodyFraming) -> TextStream {
    let decoder = BodyDecoder {
        body: response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed(),
        utf8: crate::utf8::Utf8ChunkDecoder::default(),
        sse: (framing == BodyFraming::EventStream).then(SseStreamParser::default),
        queue: VecDeque::new(),
        done: false,
    };

    stream::unfold(decoder, |mut decoder| async move {
        loop {
            if let Some(item) = decoder.queue.pop_front() {
                return Some((item, decoder));
            }
            if decoder.done {
                return None;
            }

            match decoder.body.next().await {
                Some(Ok(chunk)) => decoder.ingest(&chunk),
                Some(Err(error)) => decoder.fail(UpstreamApiError::from(error)),
                None => decoder.finish(),
            }
        }
    })
    .boxed()
}
