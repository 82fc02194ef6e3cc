//! Request description and builder.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use tracing::warn;
use url::Url;

use crate::client::RequestState;
use crate::{
    Breaker, CircuitParameters, Decoder, Error, FileMover, RestClient, RestClientConfig,
    RestError, Result, Transport, template,
};

/// URL assigned to requests whose template has not been expanded yet.
pub(crate) const UNEXPANDED_URL: &str = "about:blank";

/// Outbound request description.
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<Bytes>,
}

impl Request {
    /// Get the request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Get the request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get the request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the request body.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// Credentials applied when the request is built.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// API key supplied by the caller through a header; contributes nothing.
    ApiKey,
    /// HTTP basic authentication.
    BasicAuth {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
}

impl Credentials {
    /// Create basic authentication credentials.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::BasicAuth {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The `Authorization` header value these credentials produce.
    pub fn authorization(&self) -> Option<String> {
        match self {
            Self::ApiKey => None,
            Self::BasicAuth { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                Some(format!("Basic {encoded}"))
            }
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey => f.write_str("ApiKey"),
            Self::BasicAuth { username, .. } => f
                .debug_struct("BasicAuth")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Whether the client URL is concrete or a template awaiting expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlTarget {
    /// The URL parsed as-is.
    Literal,
    /// The URL contains placeholders.
    Template {
        /// Whether a call has expanded the template yet.
        expanded: bool,
    },
}

/// Builder for a [`RestClient`].
///
/// Headers are applied in a fixed order, later entries overriding earlier
/// ones: product-info user agent, basic-auth authorization, caller headers,
/// accept type, content type.
pub struct RequestBuilder {
    method: Method,
    url: String,
    credentials: Option<Credentials>,
    headers: Vec<(String, String)>,
    accept_type: Option<String>,
    content_type: Option<String>,
    body: Option<Bytes>,
    product_info: Option<String>,
    circuit_parameters: Option<CircuitParameters>,
    breaker: Option<Arc<dyn Breaker>>,
    transport: Option<Arc<dyn Transport>>,
    decoder: Option<Arc<dyn Decoder>>,
    files: Option<Arc<dyn FileMover>>,
    config: RestClientConfig,
    body_error: Option<RestError>,
}

impl RequestBuilder {
    /// Create a builder for `method` against a URL or URL template.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            credentials: None,
            headers: Vec::new(),
            accept_type: None,
            content_type: None,
            body: None,
            product_info: None,
            circuit_parameters: None,
            breaker: None,
            transport: None,
            decoder: None,
            files: None,
            config: RestClientConfig::default(),
            body_error: None,
        }
    }

    /// Set the credentials.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add multiple headers.
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in headers {
            self.headers.push((k.into(), v.into()));
        }
        self
    }

    /// Set the `Accept` header.
    pub fn accept_type(mut self, accept: impl Into<String>) -> Self {
        self.accept_type = Some(accept.into());
        self
    }

    /// Set the `Content-Type` header.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the product info sent as `User-Agent`.
    pub fn product_info(mut self, product_info: impl Into<String>) -> Self {
        self.product_info = Some(product_info.into());
        self
    }

    /// Set the request body as raw bytes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the request body as text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.content_type
            .get_or_insert_with(|| "text/plain; charset=utf-8".to_string());
        self.body = Some(Bytes::from(text.into()));
        self
    }

    /// Set the request body as JSON.
    pub fn json<T: Serialize>(mut self, json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(bytes) => {
                self.content_type
                    .get_or_insert_with(|| "application/json".to_string());
                self.body = Some(Bytes::from(bytes));
            }
            Err(e) => {
                warn!(error = %e, "Failed to serialize JSON body");
                self.body_error = Some(RestError::EncodingError);
            }
        }
        self
    }

    /// Set the request body as form data.
    pub fn form<T: Serialize>(mut self, form: &T) -> Self {
        match serde_urlencoded::to_string(form) {
            Ok(encoded) => {
                self.content_type
                    .get_or_insert_with(|| "application/x-www-form-urlencoded".to_string());
                self.body = Some(Bytes::from(encoded));
            }
            Err(e) => {
                warn!(error = %e, "Failed to encode form data");
                self.body_error = Some(RestError::EncodingError);
            }
        }
        self
    }

    /// Guard calls with a circuit breaker.
    pub fn circuit_parameters(mut self, parameters: CircuitParameters) -> Self {
        self.circuit_parameters = Some(parameters);
        self
    }

    /// Use a custom breaker instead of the default one built from the
    /// circuit parameters. Has no effect without circuit parameters.
    pub fn breaker(mut self, breaker: Arc<dyn Breaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Use a custom transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom decoder.
    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Use a custom file mover for downloads.
    pub fn file_mover(mut self, files: Arc<dyn FileMover>) -> Self {
        self.files = Some(files);
        self
    }

    /// Set the configuration for the default transport.
    pub fn config(mut self, config: RestClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the request description and classify its URL.
    pub(crate) fn build_request(&self) -> Result<(Request, UrlTarget)> {
        if let Some(error) = self.body_error {
            return Err(error.into());
        }

        let (url, target) = match Url::parse(&self.url) {
            Ok(url) if !template::is_template(&self.url) => (url, UrlTarget::Literal),
            _ => {
                let placeholder =
                    Url::parse(UNEXPANDED_URL).map_err(|_| RestError::InvalidSubstitution)?;
                (placeholder, UrlTarget::Template { expanded: false })
            }
        };

        let mut headers = HeaderMap::new();
        if let Some(product_info) = &self.product_info {
            insert_header(&mut headers, USER_AGENT, product_info)?;
        }
        if let Some(authorization) = self.credentials.as_ref().and_then(Credentials::authorization)
        {
            insert_header(&mut headers, AUTHORIZATION, &authorization)?;
        }
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str()).map_err(|e| {
                warn!(header = %name, error = %e, "Invalid header name");
                RestError::EncodingError
            })?;
            insert_header(&mut headers, name, value)?;
        }
        if let Some(accept) = &self.accept_type {
            insert_header(&mut headers, ACCEPT, accept)?;
        }
        if let Some(content_type) = &self.content_type {
            insert_header(&mut headers, CONTENT_TYPE, content_type)?;
        }

        let request = Request {
            method: self.method.clone(),
            url,
            headers,
            body: self.body.clone(),
        };
        Ok((request, target))
    }

    /// Build the client.
    pub fn build(self) -> Result<RestClient> {
        let (request, target) = self.build_request()?;

        let gate = match self.circuit_parameters {
            Some(parameters) => {
                parameters.validate()?;
                crate::CircuitGate::guarded(parameters, self.breaker)
            }
            None => crate::CircuitGate::direct(),
        };

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(crate::ReqwestTransport::new(&self.config)?),
        };

        let state = RequestState::new(request, self.url, target);
        Ok(RestClient::from_parts(
            state,
            gate,
            transport,
            self.decoder
                .unwrap_or_else(|| Arc::new(crate::JsonDecoder)),
            self.files
                .unwrap_or_else(|| Arc::new(crate::TokioFileMover)),
        ))
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .field("accept_type", &self.accept_type)
            .field("content_type", &self.content_type)
            .field("product_info", &self.product_info)
            .field("circuit_parameters", &self.circuit_parameters)
            .finish_non_exhaustive()
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<()> {
    let value = HeaderValue::try_from(value).map_err(|e| {
        warn!(header = %name, error = %e, "Invalid header value");
        Error::Rest(RestError::EncodingError)
    })?;
    headers.insert(name, value);
    Ok(())
}
