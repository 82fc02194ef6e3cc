//! Transport capability and the default reqwest implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::{Request, RestClientConfig, TransportError};

/// Metadata of a received response.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
}

impl ResponseMeta {
    /// Create response metadata.
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url) -> Self {
        Self {
            status,
            headers,
            url,
        }
    }

    pub(crate) fn from_reqwest(response: &reqwest::Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            url: response.url().clone(),
        }
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the final response URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get the content type if available.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Outcome of a single dispatch.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Response body, possibly partial when `error` is set.
    pub body: Option<Bytes>,
    /// Response metadata, when a response was received.
    pub meta: Option<ResponseMeta>,
    /// Transport-level failure.
    pub error: Option<TransportError>,
}

impl Dispatch {
    /// A dispatch that received a response.
    pub fn success(body: Option<Bytes>, meta: ResponseMeta) -> Self {
        Self {
            body,
            meta: Some(meta),
            error: None,
        }
    }

    /// A dispatch that failed at the transport level.
    pub fn failure(error: impl Into<TransportError>) -> Self {
        Self {
            body: None,
            meta: None,
            error: Some(error.into()),
        }
    }

    /// Whether a breaker should count this dispatch as a failure.
    ///
    /// Only transport errors count. HTTP error statuses do not.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Outcome of a download.
#[derive(Debug, Default)]
pub struct DownloadedFile {
    /// Temporary location of the downloaded body.
    pub location: Option<PathBuf>,
    /// Response metadata, when a response was received.
    pub meta: Option<ResponseMeta>,
    /// Transport-level failure.
    pub error: Option<TransportError>,
}

/// Sends requests over the network.
///
/// Implementations perform exactly one attempt per call and never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and collect the response body.
    async fn send(&self, request: &Request) -> Dispatch;

    /// Send `request` and store the response body in a temporary file.
    async fn download_to(&self, request: &Request) -> DownloadedFile;
}

/// Transport backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
    temp_dir: PathBuf,
}

impl ReqwestTransport {
    /// Create a transport with the given configuration.
    pub fn new(config: &RestClientConfig) -> Result<Self, TransportError> {
        let redirect = if config.follow_redirects {
            reqwest::redirect::Policy::limited(config.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        };

        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .gzip(config.gzip)
            .brotli(config.brotli)
            .redirect(redirect)
            .build()?;

        Ok(Self::from_client(inner))
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(inner: reqwest::Client) -> Self {
        Self {
            inner,
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Store downloads in `dir` before they are moved to their destination.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Get the underlying reqwest client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    async fn execute(&self, request: &Request) -> Result<reqwest::Response, TransportError> {
        let mut builder = self
            .inner
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        debug!(method = %request.method, url = %request.url, "Sending HTTP request");
        Ok(builder.send().await?)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Dispatch {
        let response = match self.execute(request).await {
            Ok(response) => response,
            Err(error) => {
                warn!(url = %request.url, error = %error, "HTTP request failed");
                return Dispatch::failure(error);
            }
        };

        let meta = ResponseMeta::from_reqwest(&response);
        debug!(status = %meta.status(), url = %meta.url(), "Received HTTP response");

        match response.bytes().await {
            Ok(body) => Dispatch::success(Some(body), meta),
            Err(error) => {
                warn!(url = %request.url, error = %error, "Failed to read response body");
                Dispatch {
                    body: None,
                    meta: Some(meta),
                    error: Some(error.into()),
                }
            }
        }
    }

    async fn download_to(&self, request: &Request) -> DownloadedFile {
        let response = match self.execute(request).await {
            Ok(response) => response,
            Err(error) => {
                warn!(url = %request.url, error = %error, "Download request failed");
                return DownloadedFile {
                    error: Some(error),
                    ..Default::default()
                };
            }
        };

        let meta = ResponseMeta::from_reqwest(&response);
        let location = self
            .temp_dir
            .join(format!("armature-download-{}.tmp", Uuid::new_v4()));

        let mut file = match File::create(&location).await {
            Ok(file) => file,
            Err(error) => {
                warn!(path = %location.display(), error = %error, "Failed to create temporary download file");
                return DownloadedFile {
                    meta: Some(meta),
                    ..Default::default()
                };
            }
        };

        match stream_to_file(&mut file, response, &location).await {
            Ok(bytes_written) => {
                debug!(path = %location.display(), bytes_written, "Download stored");
                DownloadedFile {
                    location: Some(location),
                    meta: Some(meta),
                    error: None,
                }
            }
            Err(error) => {
                drop(file);
                if let Err(e) = tokio::fs::remove_file(&location).await {
                    debug!(path = %location.display(), error = %e, "Failed to remove temporary download");
                }
                DownloadedFile {
                    location: None,
                    meta: Some(meta),
                    error: Some(error),
                }
            }
        }
    }
}

/// Streams a response body to `file`, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    path: &Path,
) -> Result<u64, TransportError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        writer.write_all(&chunk).await.map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to write download chunk");
            TransportError::from(e)
        })?;
        bytes_written += chunk.len() as u64;
    }

    writer.flush().await?;
    Ok(bytes_written)
}
