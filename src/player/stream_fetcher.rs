use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use reqwest::header::AUTHORIZATION;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::resource::{ResourceHandle, ResourceRegistry};
use crate::config::{NetworkConfig, StreamConfig};
use crate::models::{Credential, StreamDescriptor};
use crate::utils::StreamError;

/// A fully resolved authenticated GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

/// Transport for stream bodies.
#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn fetch(&self, request: &StreamRequest) -> Result<Bytes, StreamError>;
}

pub struct HttpStreamClient {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpStreamClient {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            max_bytes: config.max_stream_bytes,
        })
    }
}

#[async_trait]
impl StreamClient for HttpStreamClient {
    async fn fetch(&self, request: &StreamRequest) -> Result<Bytes, StreamError> {
        let mut builder = self.client.get(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Stream request to {} failed: {}", request.url, status);
            return Err(StreamError::HttpError(status.as_u16()));
        }

        match response.content_length() {
            Some(0) => return Err(StreamError::EmptyContent),
            Some(len) if len > self.max_bytes => {
                return Err(StreamError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            _ => {}
        }

        let mut body = BytesMut::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(StreamError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(StreamError::EmptyContent);
        }

        debug!("Fetched {} bytes from {}", body.len(), request.url);
        Ok(body.freeze())
    }
}

/// Authenticated stream acquisition. Holds at most one live handle.
pub struct StreamFetcher {
    client: Arc<dyn StreamClient>,
    registry: ResourceRegistry,
    base_url: Option<String>,
    partition_header: String,
    current: Option<ResourceHandle>,
}

impl StreamFetcher {
    pub fn new(
        client: Arc<dyn StreamClient>,
        registry: ResourceRegistry,
        config: &StreamConfig,
    ) -> Self {
        Self {
            client,
            registry,
            base_url: config.base_url.clone(),
            partition_header: config.partition_header.clone(),
            current: None,
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn current(&self) -> Option<&ResourceHandle> {
        self.current.as_ref()
    }

    pub fn build_request(
        &self,
        descriptor: &StreamDescriptor,
        credential: &Credential,
    ) -> Result<StreamRequest, StreamError> {
        let url = self.resolve_url(&descriptor.url)?;

        let mut headers = vec![(AUTHORIZATION.as_str().to_string(), credential.bearer())];
        if let Some(partition) = &descriptor.partition {
            headers.push((self.partition_header.clone(), partition.clone()));
        }
        headers.extend(descriptor.headers.iter().cloned());

        Ok(StreamRequest { url, headers })
    }

    fn resolve_url(&self, raw: &str) -> Result<Url, StreamError> {
        match Url::parse(raw) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.base_url.as_deref().ok_or_else(|| {
                    StreamError::InvalidUrl(format!("{} is relative and no base URL is set", raw))
                })?;
                let joined = format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    raw.trim_start_matches('/')
                );
                Url::parse(&joined).map_err(|e| StreamError::InvalidUrl(format!("{}: {}", joined, e)))
            }
            Err(e) => Err(StreamError::InvalidUrl(format!("{}: {}", raw, e))),
        }
    }

    /// Revokes the live handle and returns an owned fetch for `descriptor`
    /// bound to `token`. The caller hands the result to [`adopt`](Self::adopt).
    pub fn begin(
        &mut self,
        descriptor: &StreamDescriptor,
        credential: &Credential,
        token: CancellationToken,
    ) -> Result<BoxFuture<'static, Result<ResourceHandle, StreamError>>, StreamError> {
        self.release();
        let request = self.build_request(descriptor, credential)?;
        debug!("Fetching stream {}", request.url);
        Ok(fetch_cancellable(self.client.clone(), self.registry.clone(), request, token).boxed())
    }

    /// Takes ownership of a handle produced by a fetch from [`begin`](Self::begin).
    pub fn adopt(&mut self, handle: ResourceHandle) {
        self.release();
        self.current = Some(handle);
    }

    /// Revokes the live handle, if any.
    pub fn release(&mut self) -> bool {
        self.current
            .take()
            .map(|handle| handle.revoke())
            .unwrap_or(false)
    }
}

impl Drop for StreamFetcher {
    fn drop(&mut self) {
        self.release();
    }
}

/// Runs one fetch raced against `token`. A handle materialized after the
/// token fired is revoked before returning.
pub async fn fetch_cancellable(
    client: Arc<dyn StreamClient>,
    registry: ResourceRegistry,
    request: StreamRequest,
    token: CancellationToken,
) -> Result<ResourceHandle, StreamError> {
    let data = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(StreamError::Cancelled),
        result = client.fetch(&request) => result?,
    };

    if data.is_empty() {
        return Err(StreamError::EmptyContent);
    }

    let handle = registry.create(data);
    if token.is_cancelled() {
        handle.revoke();
        return Err(StreamError::Cancelled);
    }
    Ok(handle)
}
