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
use crate::constants::{ACCESS_TOKEN_TYPE, TOKEN_EXCHANGE_GRANT_TYPE};
use crate::errors::{CredentialsError, OAuthError};
use crate::http::{HttpClient, HttpRequest};
use base64::Engine;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use serde::Deserialize;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Handles OAuth2 Secure Token Service (STS) exchange.
/// Reference: https://datatracker.ietf.org/doc/html/rfc8693
pub(crate) struct STSHandler;

impl STSHandler {
    /// performs an oauth2 token exchange with the provided [ExchangeTokenRequest] information.
    pub(crate) async fn exchange_token(
        client: &dyn HttpClient,
        req: ExchangeTokenRequest,
    ) -> Result<TokenResponse> {
        let mut params: Vec<(&str, String)> = vec![
            ("grant_type", TOKEN_EXCHANGE_GRANT_TYPE.to_string()),
            ("audience", req.audience),
            ("requested_token_type", ACCESS_TOKEN_TYPE.to_string()),
            ("subject_token", req.subject_token),
            ("subject_token_type", req.subject_token_type),
        ];
        if !req.scope.is_empty() {
            params.push(("scope", req.scope.join(" ")));
        }

        Self::execute(client, req.url, req.authentication, req.headers, params).await
    }

    /// execute http request and token exchange
    async fn execute(
        client: &dyn HttpClient,
        url: String,
        client_auth: ClientAuthentication,
        headers: HeaderMap,
        params: Vec<(&str, String)>,
    ) -> Result<TokenResponse> {
        let mut headers = headers;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        client_auth.inject_auth(&mut headers)?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();

        let request = HttpRequest::new(Method::POST, url.as_str())
            .with_headers(headers)
            .with_body(body);
        let response = client.send(request).await?;
        tracing::debug!(%url, status = %response.status, "token exchange response");
        if response.status != StatusCode::OK {
            return Err(CredentialsError::protocol(OAuthError::from_response(
                response.status,
                &response.text(),
            )));
        }
        response.json::<TokenResponse>(&url)
    }
}

/// TokenResponse is used to decode the remote server response during
/// an oauth2 token exchange.
#[derive(Deserialize, Default, PartialEq, Debug)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub issued_token_type: String,
    #[serde(default)]
    pub token_type: String,
    pub expires_in: u64,
    pub scope: Option<String>,
}

/// ClientAuthentication represents an OAuth client ID and secret, sent with
/// HTTP basic authentication as described in
/// https://datatracker.ietf.org/doc/html/rfc6749#section-2.3.1.
///
/// Without a client ID the request is sent as a public client, with no
/// credentials at all.
#[derive(Clone, Debug, Default)]
pub(crate) struct ClientAuthentication {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl ClientAuthentication {
    // Add authentication to a Secure Token Service exchange request.
    pub(crate) fn inject_auth(&self, headers: &mut HeaderMap) -> Result<()> {
        let Some(client_id) = &self.client_id else {
            return Ok(());
        };
        let plain_header = format!(
            "{client_id}:{}",
            self.client_secret.as_deref().unwrap_or_default()
        );
        let encoded = base64::engine::general_purpose::STANDARD.encode(plain_header);
        let mut value = HeaderValue::from_str(format!("Basic {encoded}").as_str())
            .map_err(|e| CredentialsError::from_source(false, e))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// Information required to perform an oauth2 token exchange with the provided endpoint.
#[derive(Default)]
pub(crate) struct ExchangeTokenRequest {
    pub url: String,
    pub authentication: ClientAuthentication,
    pub headers: HeaderMap,
    pub subject_token: String,
    pub subject_token_type: String,
    pub audience: String,
    pub scope: Vec<String>,
}
