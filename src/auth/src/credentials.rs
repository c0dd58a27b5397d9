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

use crate::Result;
use crate::http::HttpClient;
use http::{HeaderMap, Method};
use std::sync::Arc;

pub mod external_account;
pub(crate) mod impersonated;
pub(crate) mod project_id;
pub(crate) mod subject_token;

pub(crate) mod external_account_sources {
    pub(crate) mod file_sourced;
    pub(crate) mod url_sourced;
}

pub(crate) mod internal {
    pub(crate) mod sts_exchange;
}

/// The contract shared by all credential variants.
///
/// Operations that may perform I/O receive the [HttpClient] to use. The
/// credentials keep no reference to it.
#[async_trait::async_trait]
pub trait CredentialsProvider: std::fmt::Debug + Send + Sync {
    /// Obtains a new access token, regardless of the current state.
    ///
    /// On failure the previous token, if any, is left untouched.
    async fn refresh(&self, client: &dyn HttpClient) -> Result<()>;

    /// Inserts the authorization headers for the current token.
    ///
    /// This never performs I/O and fails if no token has been obtained.
    fn apply(&self, headers: &mut HeaderMap) -> Result<()>;

    /// Returns `true` if a token is held and it is not expired.
    fn valid(&self) -> bool;

    /// Refreshes the token if needed, then applies the headers.
    ///
    /// A valid cached token performs no network call.
    async fn before_request(
        &self,
        client: &dyn HttpClient,
        _method: &Method,
        _url: &str,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        if !self.valid() {
            self.refresh(client).await?;
        }
        self.apply(headers)
    }

    /// Returns the project id associated with the credentials, if it can be
    /// determined.
    async fn project_id(&self, client: &dyn HttpClient) -> Result<Option<String>>;
}

/// A cloneable handle to any [CredentialsProvider].
///
/// Clones share the same token state.
#[derive(Clone, Debug)]
pub struct Credentials {
    inner: Arc<dyn CredentialsProvider>,
}

impl<T> From<T> for Credentials
where
    T: CredentialsProvider + 'static,
{
    fn from(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

impl Credentials {
    pub async fn refresh(&self, client: &dyn HttpClient) -> Result<()> {
        self.inner.refresh(client).await
    }

    pub fn apply(&self, headers: &mut HeaderMap) -> Result<()> {
        self.inner.apply(headers)
    }

    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    pub async fn before_request(
        &self,
        client: &dyn HttpClient,
        method: &Method,
        url: &str,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        self.inner
            .before_request(client, method, url, headers)
            .await
    }

    pub async fn project_id(&self, client: &dyn HttpClient) -> Result<Option<String>> {
        self.inner.project_id(client).await
    }
}
