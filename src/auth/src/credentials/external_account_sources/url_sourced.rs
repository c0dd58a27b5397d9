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

use crate::build_errors::Error as BuilderError;
use crate::credentials::subject_token::{Format, SubjectTokenProvider};
use crate::errors::{CredentialsError, HttpStatusError};
use crate::http::{HttpClient, HttpRequest};
use crate::{BuildResult, Result};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub(crate) struct UrlSourcedCredentials {
    pub url: String,
    pub headers: HeaderMap,
    pub format: Format,
    /// The response statuses that carry a subject token.
    pub success_codes: Vec<StatusCode>,
}

impl UrlSourcedCredentials {
    pub(crate) fn new(
        url: String,
        headers: Option<HashMap<String, String>>,
        format: Format,
    ) -> BuildResult<Self> {
        let headers = headers
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| -> BuildResult<(HeaderName, HeaderValue)> {
                let name = HeaderName::try_from(k.as_str()).map_err(BuilderError::parsing)?;
                let value = HeaderValue::try_from(v.as_str()).map_err(BuilderError::parsing)?;
                Ok((name, value))
            })
            .collect::<BuildResult<HeaderMap>>()?;
        Ok(Self {
            url,
            headers,
            format,
            success_codes: vec![StatusCode::OK],
        })
    }
}

#[async_trait::async_trait]
impl SubjectTokenProvider for UrlSourcedCredentials {
    async fn subject_token(&self, client: &dyn HttpClient) -> Result<String> {
        tracing::debug!(url = %self.url, "fetching subject token");
        let request =
            HttpRequest::new(Method::GET, self.url.as_str()).with_headers(self.headers.clone());
        let response = client.send(request).await?;
        if !self.success_codes.contains(&response.status) {
            return Err(CredentialsError::subject_token_with_source(
                format!("Url '{}' was not found.", self.url),
                HttpStatusError {
                    status: response.status,
                    body: response.text(),
                },
            ));
        }
        self.format.extract(response.text(), &self.url)
    }
}
