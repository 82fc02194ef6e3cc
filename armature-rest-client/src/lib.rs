//! # Armature REST Client
//!
//! A declarative REST client bound to a single endpoint. The request is
//! described once, then called repeatedly with per-call URL template
//! parameters and query items. Responses are decoded into one of five shapes.
//!
//! ## Features
//!
//! - **URL Templates**: `{name}` placeholders expanded on every call
//! - **Query Merging**: per-call query items replace the URL's query, with `+`
//!   always sent as `%2B`
//! - **Circuit Breaker**: optional gating with timeout, rolling failure
//!   window, bulkhead, and fallback
//! - **Typed Decoding**: raw bytes, objects, arrays, text, or nothing, with an
//!   optional JSON path into the body
//! - **Downloads**: stream a response body to a file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use armature_rest_client::{Credentials, RestClient};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Repo {
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RestClient::get("https://api.example.com/orgs/{org}/repos")
//!         .credentials(Credentials::basic("user", "secret"))
//!         .accept_type("application/json")
//!         .build()?;
//!
//!     let response = client
//!         .call()
//!         .template("org", "armature")
//!         .query("sort", "updated")
//!         .path(["data"])
//!         .array::<Repo>()
//!         .await;
//!
//!     for repo in response.into_result()? {
//!         println!("{}", repo.name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## With a Circuit Breaker
//!
//! ```rust,no_run
//! use armature_rest_client::{CircuitParameters, RestClient};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RestClient::get("https://api.example.com/health")
//!     .circuit_parameters(
//!         CircuitParameters::new(|error, request| {
//!             tracing::warn!(%error, url = %request.url(), "Health check diverted");
//!         })
//!         .with_timeout(Duration::from_millis(500))
//!         .with_max_failures(3),
//!     )
//!     .build()?;
//!
//! // Only transport failures and timeouts count against the breaker;
//! // HTTP error statuses do not.
//! let response = client.call().string().await;
//! println!("{:?}", response.status());
//! # Ok(())
//! # }
//! ```

mod circuit_breaker;
mod client;
mod config;
mod error;
mod files;
mod request;
mod response;
mod transport;

pub mod decode;
pub mod query;
pub mod template;

pub(crate) use circuit_breaker::CircuitGate;

pub use circuit_breaker::{Breaker, CircuitBreaker, CircuitState, ProtectedCall};
pub use client::{Call, ResponseToError, RestClient};
pub use config::{CircuitParameters, Fallback, RestClientConfig, RestClientConfigBuilder};
pub use decode::{Decoder, JsonDecoder, JsonPath, MAX_PATH_DEPTH, PathSegment};
pub use error::{BoxError, BreakerError, DecodeError, Error, RestError, Result, TransportError};
pub use files::{FileMover, TokioFileMover};
pub use query::QueryItem;
pub use request::{Credentials, Request, RequestBuilder, UrlTarget};
pub use response::{DownloadResponse, RestResponse};
pub use template::TemplateParams;
pub use transport::{Dispatch, DownloadedFile, ReqwestTransport, ResponseMeta, Transport};

// Re-export common types
pub use bytes::Bytes;
pub use http::{HeaderMap, Method, StatusCode, header};
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use armature_rest_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::circuit_breaker::{Breaker, CircuitBreaker, CircuitState};
    pub use crate::client::{Call, RestClient};
    pub use crate::config::{CircuitParameters, RestClientConfig};
    pub use crate::decode::{JsonPath, PathSegment};
    pub use crate::error::{BreakerError, Error, RestError, Result};
    pub use crate::request::{Credentials, RequestBuilder};
    pub use crate::response::{DownloadResponse, RestResponse};
    pub use crate::transport::{ResponseMeta, Transport};
    pub use http::{Method, StatusCode};
}
