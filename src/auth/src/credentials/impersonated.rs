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

//! Service account impersonation, the optional second hop of the exchange.

use crate::build_errors::Error as BuilderError;
use crate::constants::IMPERSONATED_TOKEN_LIFETIME;
use crate::errors::{CredentialsError, HttpStatusError};
use crate::headers_util::build_bearer_headers;
use crate::http::{HttpClient, HttpRequest};
use crate::token::Token;
use crate::{BuildResult, Result};
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, StatusCode};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const GENERATE_ACCESS_TOKEN: &str = ":generateAccessToken";

/// Extracts the service account email from an impersonation URL.
///
/// The URL must have the form `.../serviceAccounts/{email}:generateAccessToken`.
pub(crate) fn target_principal(service_account_impersonation_url: &str) -> BuildResult<String> {
    let url = service_account_impersonation_url;
    let start = url.rfind('/').map(|i| i + 1);
    let end = url.find(GENERATE_ACCESS_TOKEN);
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(url[start..end].to_string()),
        _ => Err(BuilderError::invalid_impersonation_url(url)),
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
struct GenerateAccessTokenRequest {
    delegates: Option<Vec<String>>,
    scope: Vec<String>,
    lifetime: String,
}

#[derive(serde::Deserialize)]
struct GenerateAccessTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "expireTime")]
    expire_time: String,
}

/// Exchanges `source_token` for an access token of the impersonated account.
pub(crate) async fn generate_access_token(
    client: &dyn HttpClient,
    source_token: &Token,
    quota_project_id: &Option<String>,
    scopes: Vec<String>,
    service_account_impersonation_url: &str,
) -> Result<Token> {
    let mut headers = build_bearer_headers(source_token, quota_project_id)?;
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let body = GenerateAccessTokenRequest {
        delegates: None,
        scope: scopes,
        lifetime: IMPERSONATED_TOKEN_LIFETIME.to_string(),
    };
    let body = serde_json::to_vec(&body).map_err(|e| CredentialsError::from_source(false, e))?;

    let request = HttpRequest::new(Method::POST, service_account_impersonation_url)
        .with_headers(headers)
        .with_body(body);
    let response = client.send(request).await?;
    if response.status != StatusCode::OK {
        tracing::debug!(
            url = service_account_impersonation_url,
            status = %response.status,
            "impersonation request failed"
        );
        return Err(CredentialsError::impersonation(HttpStatusError {
            status: response.status,
            body: response.text(),
        }));
    }

    let token_response =
        response.json::<GenerateAccessTokenResponse>(service_account_impersonation_url)?;
    let expires_at = OffsetDateTime::parse(&token_response.expire_time, &Rfc3339)
        .map_err(|e| CredentialsError::malformed_response(service_account_impersonation_url, e))?;

    Ok(Token {
        token: token_response.access_token,
        token_type: "Bearer".to_string(),
        expires_at: Some(expires_at),
        metadata: None,
    })
}
