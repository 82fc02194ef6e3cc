//! Typed call results.

use std::path::PathBuf;

use bytes::Bytes;
use http::StatusCode;

use crate::{Error, Request, ResponseMeta, Result};

/// Result of a completed call.
///
/// Carries the request as it was dispatched, the response metadata and raw
/// body when available, and the decoded result.
#[derive(Debug)]
pub struct RestResponse<T> {
    request: Request,
    meta: Option<ResponseMeta>,
    raw_body: Option<Bytes>,
    result: Result<T>,
}

impl<T> RestResponse<T> {
    pub(crate) fn new(
        request: Request,
        meta: Option<ResponseMeta>,
        raw_body: Option<Bytes>,
        result: Result<T>,
    ) -> Self {
        Self {
            request,
            meta,
            raw_body,
            result,
        }
    }

    /// The request snapshot that was dispatched.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Response metadata, if a response was received.
    pub fn meta(&self) -> Option<&ResponseMeta> {
        self.meta.as_ref()
    }

    /// Response status code, if a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        self.meta.as_ref().map(ResponseMeta::status)
    }

    /// The raw response body, if any.
    pub fn raw_body(&self) -> Option<&Bytes> {
        self.raw_body.as_ref()
    }

    /// The decoded result.
    pub fn result(&self) -> &Result<T> {
        &self.result
    }

    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The error, if the call failed.
    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }

    /// Consume the response and return the decoded result.
    pub fn into_result(self) -> Result<T> {
        self.result
    }
}

/// Result of a download.
#[derive(Debug)]
pub struct DownloadResponse {
    request: Request,
    meta: Option<ResponseMeta>,
    result: Result<PathBuf>,
}

impl DownloadResponse {
    pub(crate) fn new(request: Request, meta: Option<ResponseMeta>, result: Result<PathBuf>) -> Self {
        Self {
            request,
            meta,
            result,
        }
    }

    /// The request snapshot that was dispatched.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Response metadata. Always `None` when moving the file failed.
    pub fn meta(&self) -> Option<&ResponseMeta> {
        self.meta.as_ref()
    }

    /// The final destination on success.
    pub fn result(&self) -> &Result<PathBuf> {
        &self.result
    }

    /// Whether the download succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Consume the response and return the result.
    pub fn into_result(self) -> Result<PathBuf> {
        self.result
    }
}
