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

//! Errors created during credentials construction.

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for credentials builders and factories.
///
/// These errors are detected before any network call and are never worth
/// retrying: the configuration must be fixed.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    /// A problem finding or opening the credentials file.
    pub fn is_loading(&self) -> bool {
        matches!(self.0, ErrorKind::Loading(_))
    }

    /// A problem parsing the credentials configuration.
    pub fn is_parsing(&self) -> bool {
        matches!(self.0, ErrorKind::Parsing(_))
    }

    /// The `credential_source` is missing, ambiguous, or has an invalid format.
    pub fn is_invalid_credential_source(&self) -> bool {
        matches!(self.0, ErrorKind::InvalidCredentialSource(_))
    }

    /// The service account impersonation URL does not name a target principal.
    pub fn is_invalid_impersonation_url(&self) -> bool {
        matches!(self.0, ErrorKind::InvalidImpersonationUrl(_))
    }

    /// Create an error representing problems loading or reading a credentials
    /// file.
    pub(crate) fn loading<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Loading(source.into()))
    }

    /// A problem parsing the credentials configuration.
    pub(crate) fn parsing<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Parsing(source.into()))
    }

    pub(crate) fn invalid_credential_source<T: Into<String>>(message: T) -> Error {
        Error(ErrorKind::InvalidCredentialSource(message.into()))
    }

    pub(crate) fn invalid_impersonation_url<T: Into<String>>(url: T) -> Error {
        Error(ErrorKind::InvalidImpersonationUrl(url.into()))
    }
}

#[derive(thiserror::Error, Debug)]
enum ErrorKind {
    #[error("could not find or open the credentials file {0}")]
    Loading(#[source] BoxError),
    #[error("cannot parse the credentials file {0}")]
    Parsing(#[source] BoxError),
    #[error("{0}")]
    InvalidCredentialSource(String),
    #[error(
        "Unable to determine target principal from service account impersonation URL. url=<{0}>"
    )]
    InvalidImpersonationUrl(String),
}
