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
use crate::headers_util::build_bearer_headers;
use crate::http::{HttpClient, HttpRequest};
use crate::token::Token;
use http::{Method, StatusCode};
use tokio::sync::OnceCell;

/// Extracts the project number from a workload identity pool audience.
///
/// The audience has the form
/// `//iam.googleapis.com/projects/{number}/locations/...`.
pub(crate) fn project_number(audience: &str) -> Option<String> {
    let mut components = audience.split('/');
    components.find(|c| *c == "projects")?;
    components
        .next()
        .filter(|number| !number.is_empty())
        .map(str::to_string)
}

#[derive(serde::Deserialize)]
struct ProjectResponse {
    #[serde(rename = "projectId")]
    project_id: Option<String>,
}

/// Resolves and caches the project id for the credentials' project number.
#[derive(Debug)]
pub(crate) struct ProjectResolver {
    project_number: Option<String>,
    resource_manager_url: String,
    project_id: OnceCell<String>,
}

impl ProjectResolver {
    pub(crate) fn new(audience: &str, resource_manager_url: String) -> Self {
        Self {
            project_number: project_number(audience),
            resource_manager_url,
            project_id: OnceCell::new(),
        }
    }

    pub(crate) fn project_number(&self) -> Option<&str> {
        self.project_number.as_deref()
    }

    pub(crate) fn cached(&self) -> Option<String> {
        self.project_id.get().cloned()
    }

    /// Looks up the project id using `token`.
    ///
    /// Only successful lookups are cached. Error statuses and malformed
    /// responses resolve to `None`.
    pub(crate) async fn resolve(
        &self,
        client: &dyn HttpClient,
        token: &Token,
        quota_project_id: &Option<String>,
    ) -> Result<Option<String>> {
        if let Some(project_id) = self.cached() {
            return Ok(Some(project_id));
        }
        let Some(number) = &self.project_number else {
            return Ok(None);
        };
        let url = format!("{}{number}", self.resource_manager_url);
        let headers = build_bearer_headers(token, quota_project_id)?;
        let response = client
            .send(HttpRequest::new(Method::GET, url.as_str()).with_headers(headers))
            .await?;
        if response.status != StatusCode::OK {
            tracing::warn!(%url, status = %response.status, "cannot resolve the project id");
            return Ok(None);
        }
        let project_id = match response.json::<ProjectResponse>(&url) {
            Ok(ProjectResponse {
                project_id: Some(id),
            }) => id,
            Ok(_) => return Ok(None),
            Err(e) => {
                tracing::warn!(%url, "cannot parse the project lookup response: {e}");
                return Ok(None);
            }
        };
        let project_id = self.project_id.get_or_init(|| async { project_id }).await;
        Ok(Some(project_id.clone()))
    }
}
