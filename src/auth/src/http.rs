// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The HTTP capability used by credentials and the authorized session.
//!
//! Credentials never own an HTTP client. Each operation that may perform I/O
//! receives a `&dyn HttpClient`, so applications decide how requests are
//! sent. [ReqwestClient] is the default implementation.

use crate::Result;
use crate::errors::CredentialsError;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;

/// A request sent through an [HttpClient].
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// The timeout for this request, if `None` the client default applies.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new<U: Into<String>>(method: Method, url: U) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The response to an [HttpRequest].
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new<B: Into<Bytes>>(status: StatusCode, body: B) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// The body as text, invalid UTF-8 sequences are replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub(crate) fn json<T: serde::de::DeserializeOwned>(&self, origin: &str) -> Result<T> {
        serde_json::from_slice::<T>(&self.body)
            .map_err(|e| CredentialsError::malformed_response(origin, e))
    }
}

/// Sends HTTP requests on behalf of credentials and sessions.
///
/// Implementations report network failures with
/// [CredentialsError::is_transport] errors, and timeouts with
/// [CredentialsError::is_timeout] errors. Any response, including error
/// statuses, is returned as `Ok`.
#[async_trait::async_trait]
pub trait HttpClient: std::fmt::Debug + Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// An [HttpClient] backed by [reqwest].
#[derive(Clone, Debug, Default)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured `reqwest::Client`, e.g. one with custom proxies.
    pub fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        tracing::debug!(url = %request.url, method = %request.method, "sending request");
        let mut builder = self
            .inner
            .request(request.method, request.url.as_str())
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_send_error(&request.url, e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_send_error(&request.url, e))?;
        tracing::debug!(url = %request.url, %status, "received response");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_send_error(url: &str, e: reqwest::Error) -> CredentialsError {
    if e.is_timeout() {
        return CredentialsError::timeout_with_source(e);
    }
    CredentialsError::transport(format!("cannot send request to {url}"), e)
}
