//! REST client implementation.
//!
//! A [`RestClient`] owns one request description for its whole lifetime and
//! can be called repeatedly. Every call runs the same pipeline:
//!
//! 1. expand the URL template when template parameters are supplied,
//! 2. replace the query component when query items are supplied,
//! 3. dispatch, through the circuit breaker when one is configured,
//! 4. consult the caller's response-to-error hook,
//! 5. decode the body into the requested shape.
//!
//! Steps 1 and 2 mutate the request owned by the client and the dispatch
//! reads it back afterwards under a separate lock. Concurrent calls on one
//! client can therefore observe each other's template and query values.
//! Callers that need isolation must serialize calls or use one client per
//! endpoint-and-query combination.
//!
//! Each call is an `async fn` whose future resolves exactly once with a fully
//! formed response; failures never escape as panics or early returns.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitGate;
use crate::decode::{self, JsonPath, PathSegment};
use crate::query::{self, QueryItem};
use crate::request::UrlTarget;
use crate::template::{self, TemplateParams};
use crate::{
    BoxError, CircuitState, Decoder, Dispatch, DownloadResponse, DownloadedFile, Error,
    FileMover, Request, RequestBuilder, ResponseMeta, RestError, RestResponse, Result, Transport,
};

/// Hook that turns a received response into an error.
///
/// Returning `Some` short-circuits the call with [`Error::Response`].
pub type ResponseToError =
    Arc<dyn Fn(Option<&ResponseMeta>, Option<&Bytes>) -> Option<BoxError> + Send + Sync>;

/// The request owned by a client, plus the URL it was built from.
#[derive(Debug)]
pub(crate) struct RequestState {
    request: Request,
    source: String,
    target: UrlTarget,
}

impl RequestState {
    pub(crate) fn new(request: Request, source: String, target: UrlTarget) -> Self {
        Self {
            request,
            source,
            target,
        }
    }

    fn apply_template(&mut self, params: Option<&TemplateParams>) -> std::result::Result<(), RestError> {
        match (params, self.target) {
            (Some(params), target) => {
                self.request.url = template::expand(&self.source, params)?;
                if let UrlTarget::Template { .. } = target {
                    self.target = UrlTarget::Template { expanded: true };
                }
                Ok(())
            }
            (None, UrlTarget::Template { expanded: false }) => {
                debug!(template = %self.source, "URL template used without parameters");
                Err(RestError::InvalidSubstitution)
            }
            (None, _) => Ok(()),
        }
    }
}

/// REST client bound to a single endpoint.
///
/// Cloning is cheap and yields a handle to the same client: clones share the
/// owned request, the circuit breaker, and the transport.
#[derive(Clone)]
pub struct RestClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    state: Mutex<RequestState>,
    gate: CircuitGate,
    transport: Arc<dyn Transport>,
    decoder: Arc<dyn Decoder>,
    files: Arc<dyn FileMover>,
}

impl RestClient {
    /// Create a builder for a client using `method` against `url`.
    ///
    /// `url` may be a URL template containing `{name}` placeholders.
    pub fn builder(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, url)
    }

    /// Create a GET client builder.
    pub fn get(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::GET, url)
    }

    /// Create a POST client builder.
    pub fn post(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::POST, url)
    }

    /// Create a PUT client builder.
    pub fn put(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::PUT, url)
    }

    /// Create a PATCH client builder.
    pub fn patch(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::PATCH, url)
    }

    /// Create a DELETE client builder.
    pub fn delete(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::DELETE, url)
    }

    /// Create a HEAD client builder.
    pub fn head(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::HEAD, url)
    }

    pub(crate) fn from_parts(
        state: RequestState,
        gate: CircuitGate,
        transport: Arc<dyn Transport>,
        decoder: Arc<dyn Decoder>,
        files: Arc<dyn FileMover>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                state: Mutex::new(state),
                gate,
                transport,
                decoder,
                files,
            }),
        }
    }

    /// Snapshot of the owned request as it currently stands.
    pub fn request(&self) -> Request {
        self.inner.state.lock().request.clone()
    }

    /// Whether the URL is literal or a template, and if it has been expanded.
    pub fn url_target(&self) -> UrlTarget {
        self.inner.state.lock().target
    }

    /// Circuit state, when the client is guarded by a breaker.
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.inner.gate.state()
    }

    /// Start a call.
    pub fn call(&self) -> Call<'_> {
        Call {
            client: self,
            template_params: None,
            query_items: None,
            path: JsonPath::root(),
            response_to_error: None,
        }
    }

    /// Download the response body to `destination` without per-call options.
    pub async fn download(&self, destination: impl AsRef<Path>) -> DownloadResponse {
        self.call().download(destination).await
    }

    /// Apply template parameters and query items to the owned request.
    fn prepare(
        &self,
        params: Option<&TemplateParams>,
        query_items: Option<&[QueryItem]>,
    ) -> std::result::Result<(), RestError> {
        let mut state = self.inner.state.lock();
        state.apply_template(params)?;
        query::merge(&mut state.request.url, query_items);
        Ok(())
    }
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RestClient")
            .field("method", &state.request.method)
            .field("url", &state.source)
            .field("target", &state.target)
            .field("gate", &self.inner.gate)
            .finish_non_exhaustive()
    }
}

/// A single call on a [`RestClient`].
///
/// Configure per-call template parameters, query items, decode path, and
/// error hook, then finish with one of the response shapes.
#[must_use = "a call does nothing until a response shape is awaited"]
pub struct Call<'a> {
    client: &'a RestClient,
    template_params: Option<TemplateParams>,
    query_items: Option<Vec<QueryItem>>,
    path: JsonPath,
    response_to_error: Option<ResponseToError>,
}

impl Call<'_> {
    /// Set all template parameters.
    pub fn template_params(mut self, params: TemplateParams) -> Self {
        self.template_params = Some(params);
        self
    }

    /// Add a template parameter.
    pub fn template(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.template_params
            .get_or_insert_with(TemplateParams::new)
            .insert(name.into(), value.into());
        self
    }

    /// Set all query items, replacing the request's query component.
    pub fn query_items<I, K, V>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query_items = Some(
            items
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Add a query item.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_items
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    /// Set the path to the node decoded by [`object`](Self::object) and
    /// [`array`](Self::array).
    pub fn path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PathSegment>,
    {
        self.path = JsonPath::new(path);
        self
    }

    /// Set a hook that can turn a received response into an error.
    ///
    /// Consulted by every shape except [`bytes`](Self::bytes).
    pub fn response_to_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(Option<&ResponseMeta>, Option<&Bytes>) -> Option<BoxError> + Send + Sync + 'static,
    {
        self.response_to_error = Some(Arc::new(hook));
        self
    }

    /// Return the raw body.
    pub async fn bytes(self) -> RestResponse<Bytes> {
        self.run(false, |body| non_empty(body).cloned()).await
    }

    /// Decode the node at the configured path into `T`.
    pub async fn object<T: DeserializeOwned>(mut self) -> RestResponse<T> {
        let decoder = Arc::clone(&self.client.inner.decoder);
        let path = std::mem::take(&mut self.path);
        self.run(true, move |body| {
            let node = locate(decoder.as_ref(), body, &path)?;
            Ok(decode::decode(node)?)
        })
        .await
    }

    /// Decode the array at the configured path into a `Vec<T>`.
    pub async fn array<T: DeserializeOwned>(mut self) -> RestResponse<Vec<T>> {
        let decoder = Arc::clone(&self.client.inner.decoder);
        let path = std::mem::take(&mut self.path);
        self.run(true, move |body| {
            let node = locate(decoder.as_ref(), body, &path)?;
            Ok(decode::decode_array(node)?)
        })
        .await
    }

    /// Decode the body as UTF-8 text.
    pub async fn string(self) -> RestResponse<String> {
        self.run(true, |body| {
            let bytes = non_empty(body)?;
            String::from_utf8(bytes.to_vec()).map_err(|_| RestError::SerializationError.into())
        })
        .await
    }

    /// Ignore the body.
    pub async fn void(self) -> RestResponse<()> {
        self.run(true, |_| Ok(())).await
    }

    /// Download the response body to `destination`.
    ///
    /// Downloads are not routed through the circuit breaker. When moving the
    /// file fails, no response metadata is reported.
    pub async fn download(self, destination: impl AsRef<Path>) -> DownloadResponse {
        let destination = destination.as_ref().to_path_buf();
        let client = self.client;

        if let Err(error) = client.prepare(self.template_params.as_ref(), self.query_items.as_deref()) {
            return DownloadResponse::new(client.request(), None, Err(error.into()));
        }
        let request = client.request();

        debug!(url = %request.url(), destination = %destination.display(), "Starting download");
        let DownloadedFile {
            location,
            meta,
            error,
        } = client.inner.transport.download_to(&request).await;

        if let Some(error) = error {
            if let Some(location) = &location
                && let Err(e) = client.inner.files.remove_file(location).await
            {
                debug!(path = %location.display(), error = %e, "Failed to remove temporary download");
            }
            return DownloadResponse::new(request, meta, Err(Error::Transport(error)));
        }

        let Some(source) = location else {
            warn!(url = %request.url(), "Transport produced no downloaded file");
            return DownloadResponse::new(request, meta, Err(RestError::InvalidFile.into()));
        };

        match client.inner.files.move_file(&source, &destination).await {
            Ok(()) => {
                debug!(destination = %destination.display(), "Download complete");
                DownloadResponse::new(request, meta, Ok(destination))
            }
            Err(e) => {
                warn!(
                    source = %source.display(),
                    destination = %destination.display(),
                    error = %e,
                    "Failed to move downloaded file"
                );
                if let Err(e) = client.inner.files.remove_file(&source).await {
                    debug!(path = %source.display(), error = %e, "Failed to remove temporary download");
                }
                DownloadResponse::new(request, None, Err(RestError::FileManagerError.into()))
            }
        }
    }

    async fn run<T, F>(self, consult_hook: bool, decode: F) -> RestResponse<T>
    where
        F: FnOnce(Option<&Bytes>) -> Result<T>,
    {
        let client = self.client;

        if let Err(error) = client.prepare(self.template_params.as_ref(), self.query_items.as_deref()) {
            return RestResponse::new(client.request(), None, None, Err(error.into()));
        }
        let request = client.request();

        debug!(method = %request.method(), url = %request.url(), "Dispatching REST call");
        let dispatch = client
            .inner
            .gate
            .dispatch(client.inner.transport.as_ref(), &request)
            .await;
        let Dispatch { body, meta, error } = match dispatch {
            Ok(dispatch) => dispatch,
            Err(_) => return RestResponse::new(request, None, None, Err(Error::CircuitOpen)),
        };

        if let Some(error) = error {
            return RestResponse::new(request, meta, body, Err(Error::Transport(error)));
        }

        if consult_hook
            && let Some(hook) = &self.response_to_error
            && let Some(error) = hook(meta.as_ref(), body.as_ref())
        {
            debug!(url = %request.url(), error = %error, "Response rejected by error hook");
            return RestResponse::new(request, meta, body, Err(Error::Response(error)));
        }

        let result = decode(body.as_ref());
        RestResponse::new(request, meta, body, result)
    }
}

impl fmt::Debug for Call<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("template_params", &self.template_params)
            .field("query_items", &self.query_items)
            .field("path", &self.path)
            .field("response_to_error", &self.response_to_error.is_some())
            .finish()
    }
}

fn non_empty(body: Option<&Bytes>) -> Result<&Bytes> {
    body.filter(|b| !b.is_empty())
        .ok_or(Error::Rest(RestError::NoData))
}

fn locate(decoder: &dyn Decoder, body: Option<&Bytes>, path: &JsonPath) -> Result<Value> {
    let bytes = non_empty(body)?;
    let root = decoder.parse(bytes)?;
    Ok(decoder.navigate(root, path)?)
}
