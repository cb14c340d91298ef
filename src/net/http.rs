//! HTTP transport backed by [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, trace};

use super::{Network, ProgressFn, Request, Response, ResponseSource};
use crate::error::FetchError;

/// Upper bound on the buffer reserved up front from `Content-Length`.
const MAX_PREALLOCATION: usize = 64 * 1024 * 1024;

/// Executes requests over HTTP(S), buffering the body chunk by chunk so
/// progress can be reported while it downloads.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    /// Build a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::transport("<client>", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn send(
        &self,
        request: &Request,
        progress: Option<&ProgressFn>,
    ) -> Result<Response, FetchError> {
        debug!(
            url = %request.url,
            method = %request.method,
            range = request.is_range(),
            "http request"
        );

        let mut response = self
            .client
            .request(request.method.clone(), request.url.as_str())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|e| FetchError::transport(&request.url, e))?;

        let status = response.status().as_u16();
        let total = response.content_length();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let url = response.url().to_string();

        let capacity = total
            .and_then(|t| usize::try_from(t).ok())
            .unwrap_or(0)
            .min(MAX_PREALLOCATION);
        let mut body = Vec::with_capacity(capacity);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::transport(&request.url, e))?
        {
            body.extend_from_slice(&chunk);
            if let Some(progress) = progress {
                progress(body.len() as u64, total);
            }
        }

        trace!(%url, status, bytes = body.len(), "http response complete");
        Ok(Response {
            url,
            status,
            content_type,
            body,
            source: ResponseSource::Network,
        })
    }
}
