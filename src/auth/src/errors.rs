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

//! Errors returned while refreshing or using credentials.
//!
//! Errors detected while *constructing* credentials are reported by
//! [crate::build_errors::Error] instead.

use http::StatusCode;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter, Result};
use std::sync::Arc;

type BoxError = Arc<dyn Error + Send + Sync + 'static>;

/// Represents an error using [Credentials](crate::credentials::Credentials).
///
/// The error carries a kind that applications can query with the `is_*()`
/// predicates, and a flag indicating if the problem is transient.
///
/// Transient errors may succeed if the operation is retried. This crate never
/// retries them internally, the decision is left to the caller.
#[derive(Clone, Debug)]
pub struct CredentialsError {
    kind: ErrorKind,
    is_transient: bool,
    message: String,
    source: Option<BoxError>,
}

#[derive(Clone, Debug)]
enum ErrorKind {
    SubjectToken,
    Protocol(OAuthError),
    Impersonation,
    Timeout,
    Transport,
    MissingToken,
    Other,
}

impl CredentialsError {
    /// The subject token could not be read, fetched, or parsed.
    pub fn is_subject_token(&self) -> bool {
        matches!(self.kind, ErrorKind::SubjectToken)
    }

    /// The token exchange service rejected the request.
    ///
    /// Use [CredentialsError::oauth_error] to inspect the error fields.
    pub fn is_protocol(&self) -> bool {
        matches!(self.kind, ErrorKind::Protocol(_))
    }

    /// The service account impersonation request failed.
    pub fn is_impersonation(&self) -> bool {
        matches!(self.kind, ErrorKind::Impersonation)
    }

    /// The time budget for the operation was exhausted.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// The underlying HTTP client failed to send a request or receive a
    /// response.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport)
    }

    /// The credentials were used before any token was obtained.
    pub fn is_missing_token(&self) -> bool {
        matches!(self.kind, ErrorKind::MissingToken)
    }

    /// Returns `true` if retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        self.is_transient
    }

    /// The error reported by the token exchange service, if any.
    pub fn oauth_error(&self) -> Option<&OAuthError> {
        match &self.kind {
            ErrorKind::Protocol(e) => Some(e),
            _ => None,
        }
    }

    /// Creates a new error with a message and no source.
    ///
    /// Applications rarely need this function, it is useful when mocking
    /// [HttpClient](crate::http::HttpClient) or
    /// [CredentialsProvider](crate::credentials::CredentialsProvider) in tests.
    pub fn from_msg<T: Into<String>>(is_transient: bool, message: T) -> Self {
        Self::new(ErrorKind::Other, is_transient, message.into(), None)
    }

    /// Creates a new error wrapping `source`.
    pub fn from_source<T: Error + Send + Sync + 'static>(is_transient: bool, source: T) -> Self {
        Self::new(
            ErrorKind::Other,
            is_transient,
            "credentials error".to_string(),
            Some(Arc::new(source)),
        )
    }

    fn new(kind: ErrorKind, is_transient: bool, message: String, source: Option<BoxError>) -> Self {
        Self {
            kind,
            is_transient,
            message,
            source,
        }
    }

    pub(crate) fn subject_token<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::SubjectToken, false, message.into(), None)
    }

    pub(crate) fn subject_token_with_source<T, S>(message: T, source: S) -> Self
    where
        T: Into<String>,
        S: Error + Send + Sync + 'static,
    {
        Self::new(
            ErrorKind::SubjectToken,
            false,
            message.into(),
            Some(Arc::new(source)),
        )
    }

    pub(crate) fn protocol(error: OAuthError) -> Self {
        let is_transient = is_retryable(error.status);
        Self::new(
            ErrorKind::Protocol(error.clone()),
            is_transient,
            error.to_string(),
            None,
        )
    }

    pub(crate) fn impersonation<S>(source: S) -> Self
    where
        S: Error + Send + Sync + 'static,
    {
        Self::new(
            ErrorKind::Impersonation,
            false,
            "Unable to acquire impersonated credentials".to_string(),
            Some(Arc::new(source)),
        )
    }

    pub(crate) fn timeout<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::Timeout, true, message.into(), None)
    }

    pub(crate) fn timeout_with_source<S>(source: S) -> Self
    where
        S: Error + Send + Sync + 'static,
    {
        Self::new(
            ErrorKind::Timeout,
            true,
            "the request timed out".to_string(),
            Some(Arc::new(source)),
        )
    }

    pub(crate) fn transport<T, S>(message: T, source: S) -> Self
    where
        T: Into<String>,
        S: Error + Send + Sync + 'static,
    {
        Self::new(
            ErrorKind::Transport,
            true,
            message.into(),
            Some(Arc::new(source)),
        )
    }

    pub(crate) fn missing_token() -> Self {
        Self::new(
            ErrorKind::MissingToken,
            false,
            "credentials hold no access token, refresh them before use".to_string(),
            None,
        )
    }

    /// A response body that could not be decoded.
    pub(crate) fn malformed_response<S>(origin: &str, source: S) -> Self
    where
        S: Error + Send + Sync + 'static,
    {
        Self::new(
            ErrorKind::Transport,
            false,
            format!("cannot decode the response from {origin}"),
            Some(Arc::new(source)),
        )
    }
}

impl Display for CredentialsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.message)?;
        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }
        Ok(())
    }
}

impl Error for CredentialsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn Error + 'static))
    }
}

/// The error fields returned by an OAuth 2.0 token endpoint.
///
/// See [RFC 6749 section 5.2](https://datatracker.ietf.org/doc/html/rfc6749#section-5.2).
#[derive(Clone, Debug, PartialEq)]
pub struct OAuthError {
    /// The HTTP status code of the response.
    pub status: StatusCode,
    /// The `error` field, if the body was a well-formed error response.
    pub error: Option<String>,
    /// The `error_description` field.
    pub error_description: Option<String>,
    /// The `error_uri` field.
    pub error_uri: Option<String>,
    /// The response body, verbatim.
    pub body: String,
}

#[derive(serde::Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
    error_uri: Option<String>,
}

impl OAuthError {
    pub(crate) fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed = serde_json::from_str::<OAuthErrorBody>(body).ok();
        Self {
            status,
            error: parsed.as_ref().map(|p| p.error.clone()),
            error_description: parsed.as_ref().and_then(|p| p.error_description.clone()),
            error_uri: parsed.and_then(|p| p.error_uri),
            body: body.to_string(),
        }
    }
}

impl Display for OAuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let Some(error) = &self.error else {
            return write!(f, "Error code {}: {}", self.status.as_u16(), self.body);
        };
        write!(f, "Error code {error}")?;
        if let Some(description) = &self.error_description {
            write!(f, ": {description}")?;
        }
        if let Some(uri) = &self.error_uri {
            write!(f, " - {uri}")?;
        }
        Ok(())
    }
}

impl Error for OAuthError {}

/// The response to a non-protocol request failed with an unexpected status.
#[derive(Clone, Debug, thiserror::Error)]
#[error("the request failed with status {status}, body=<{body}>")]
pub(crate) struct HttpStatusError {
    pub status: StatusCode,
    pub body: String,
}

pub(crate) fn is_retryable(c: StatusCode) -> bool {
    match c {
        // Internal server errors do not indicate that there is anything wrong
        // with our request, so we retry them.
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => true,
        _ => false,
    }
}
