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

//! [Workload identity federation] credentials.
//!
//! External account credentials exchange a token issued outside Google
//! Cloud, the *subject token*, for a Google Cloud access token. The subject
//! token is read from a file or fetched from a URL, then presented to the
//! Security Token Service (STS). Optionally the STS token is exchanged again
//! for an access token of a service account.
//!
//! [Workload identity federation]: https://cloud.google.com/iam/docs/workload-identity-federation

use super::external_account_sources::file_sourced::FileSourcedCredentials;
use super::external_account_sources::url_sourced::UrlSourcedCredentials;
use super::impersonated::{generate_access_token, target_principal};
use super::internal::sts_exchange::{ClientAuthentication, ExchangeTokenRequest, STSHandler};
use super::project_id::ProjectResolver;
use super::subject_token::{CredentialSource, CredentialSourceFormat, Format, SubjectTokenProvider};
use super::{Credentials, CredentialsProvider};
use crate::build_errors::Error as BuilderError;
use crate::clock::{Clock, SystemClock};
use crate::constants::{CLOUD_RESOURCE_MANAGER_URL, IAM_SCOPE};
use crate::errors::CredentialsError;
use crate::headers_util::apply_bearer_headers;
use crate::http::HttpClient;
use crate::token::Token;
use crate::{BuildResult, Result};
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use time::OffsetDateTime;

#[derive(Serialize, Deserialize, Debug, Default)]
struct CredentialSourceFile {
    file: Option<String>,
    url: Option<String>,
    headers: Option<HashMap<String, String>>,
    format: Option<CredentialSourceFormat>,
}

/// A representation of a [external account config file].
///
/// [external account config file]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage
#[derive(Serialize, Deserialize, Debug)]
struct ExternalAccountFile {
    audience: String,
    subject_token_type: String,
    token_url: String,
    service_account_impersonation_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    quota_project_id: Option<String>,
    scopes: Option<Vec<String>>,
    credential_source: CredentialSourceFile,
}

impl TryFrom<CredentialSourceFile> for CredentialSource {
    type Error = BuilderError;

    fn try_from(source: CredentialSourceFile) -> BuildResult<Self> {
        let format = Format::new(source.format)?;
        match (source.file, source.url) {
            (Some(_), Some(_)) => Err(BuilderError::invalid_credential_source(
                "Ambiguous credential_source. 'file' is mutually exclusive with 'url'.",
            )),
            (None, None) => Err(BuilderError::invalid_credential_source(
                "Missing credential_source. A 'file' or 'url' must be provided.",
            )),
            (Some(file), None) => Ok(Self::File(FileSourcedCredentials::new(file, format))),
            (None, Some(url)) => Ok(Self::Url(UrlSourcedCredentials::new(
                url,
                source.headers,
                format,
            )?)),
        }
    }
}

/// The immutable parameters of external account credentials.
#[derive(Clone)]
struct ExternalAccountConfig {
    audience: String,
    subject_token_type: String,
    token_url: String,
    service_account_impersonation_url: Option<String>,
    target_principal: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    scopes: Vec<String>,
    quota_project_id: Option<String>,
    credential_source: CredentialSource,
    resource_manager_url: String,
}

impl std::fmt::Debug for ExternalAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalAccountConfig")
            .field("audience", &self.audience)
            .field("subject_token_type", &self.subject_token_type)
            .field("token_url", &self.token_url)
            .field(
                "service_account_impersonation_url",
                &self.service_account_impersonation_url,
            )
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[censored]"),
            )
            .field("scopes", &self.scopes)
            .field("quota_project_id", &self.quota_project_id)
            .field("credential_source", &self.credential_source)
            .finish()
    }
}

/// Credentials for workload identity federation.
///
/// The token is refreshed on demand by [CredentialsProvider::before_request]
/// or explicitly by [CredentialsProvider::refresh]. Wrap the credentials in
/// [Credentials] to share them, clones of the wrapper share the token.
#[derive(Debug)]
pub struct ExternalAccountCredentials {
    config: ExternalAccountConfig,
    token: RwLock<Option<Token>>,
    project: ProjectResolver,
    clock: Arc<dyn Clock>,
}

impl ExternalAccountCredentials {
    fn new(config: ExternalAccountConfig, clock: Arc<dyn Clock>) -> Self {
        let project = ProjectResolver::new(&config.audience, config.resource_manager_url.clone());
        Self {
            config,
            token: RwLock::new(None),
            project,
            clock,
        }
    }

    /// Returns new credentials with different scopes.
    ///
    /// The new credentials start without a token or a cached project id.
    pub fn with_scopes<I, S>(&self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = self.config.clone();
        config.scopes = scopes.into_iter().map(|s| s.into()).collect();
        Self::new(config, self.clock.clone())
    }

    /// Returns new credentials with a different [quota project].
    ///
    /// [quota project]: https://cloud.google.com/docs/quotas/quota-project
    pub fn with_quota_project<S: Into<String>>(&self, quota_project_id: S) -> Self {
        let mut config = self.config.clone();
        config.quota_project_id = Some(quota_project_id.into());
        Self::new(config, self.clock.clone())
    }

    /// A snapshot of the current token.
    pub fn token(&self) -> Option<Token> {
        self.token.read().expect("token lock is poisoned").clone()
    }

    /// The expiration of the current token.
    pub fn expiry(&self) -> Option<OffsetDateTime> {
        self.token().and_then(|t| t.expires_at)
    }

    /// Returns `true` if the current token expires within the clock skew.
    pub fn expired(&self) -> bool {
        self.token().is_some_and(|t| t.is_expired(self.clock.now()))
    }

    pub fn audience(&self) -> &str {
        &self.config.audience
    }

    pub fn token_url(&self) -> &str {
        &self.config.token_url
    }

    pub fn scopes(&self) -> &[String] {
        &self.config.scopes
    }

    /// Returns `true` if no scopes are configured.
    pub fn requires_scopes(&self) -> bool {
        self.config.scopes.is_empty()
    }

    /// Returns `true` if all of `scopes` are configured.
    pub fn has_scopes(&self, scopes: &[&str]) -> bool {
        scopes.iter().all(|s| self.config.scopes.iter().any(|c| c == s))
    }

    pub fn quota_project_id(&self) -> Option<&str> {
        self.config.quota_project_id.as_deref()
    }

    /// The project number parsed from the audience, if any.
    pub fn project_number(&self) -> Option<&str> {
        self.project.project_number()
    }

    /// The impersonated service account, if any.
    pub fn service_account_email(&self) -> Option<&str> {
        self.config.target_principal.as_deref()
    }

    async fn fetch_token(&self, client: &dyn HttpClient) -> Result<Token> {
        let subject_token = self.config.credential_source.subject_token(client).await?;

        // The caller's scopes are requested by the impersonation hop.
        let scope = match self.config.service_account_impersonation_url {
            Some(_) => vec![IAM_SCOPE.to_string()],
            None => self.config.scopes.clone(),
        };
        let req = ExchangeTokenRequest {
            url: self.config.token_url.clone(),
            authentication: ClientAuthentication {
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
            },
            headers: HeaderMap::new(),
            subject_token,
            subject_token_type: self.config.subject_token_type.clone(),
            audience: self.config.audience.clone(),
            scope,
        };

        let now = self.clock.now();
        let token_res = STSHandler::exchange_token(client, req).await?;
        let expires_in = i64::try_from(token_res.expires_in).unwrap_or(i64::MAX);
        let token = Token {
            token: token_res.access_token,
            token_type: "Bearer".to_string(),
            expires_at: Some(now.saturating_add(time::Duration::seconds(expires_in))),
            metadata: token_res
                .scope
                .map(|scope| HashMap::from([("scope".to_string(), scope)])),
        };

        let Some(url) = &self.config.service_account_impersonation_url else {
            return Ok(token);
        };
        generate_access_token(
            client,
            &token,
            &self.config.quota_project_id,
            self.config.scopes.clone(),
            url,
        )
        .await
    }

    /// Refreshes and stores the token, returning a copy of it.
    async fn refresh_token(&self, client: &dyn HttpClient) -> Result<Token> {
        tracing::debug!(
            audience = %self.config.audience,
            "refreshing external account credentials"
        );
        let token = self.fetch_token(client).await?;
        *self.token.write().expect("token lock is poisoned") = Some(token.clone());
        Ok(token)
    }

    /// Returns a valid token, refreshing it first if needed.
    async fn valid_token(&self, client: &dyn HttpClient) -> Result<Token> {
        match self.token() {
            Some(token) if !token.is_expired(self.clock.now()) => Ok(token),
            _ => self.refresh_token(client).await,
        }
    }
}

#[async_trait::async_trait]
impl CredentialsProvider for ExternalAccountCredentials {
    async fn refresh(&self, client: &dyn HttpClient) -> Result<()> {
        self.refresh_token(client).await.map(|_| ())
    }

    fn apply(&self, headers: &mut HeaderMap) -> Result<()> {
        let token = self.token().ok_or_else(CredentialsError::missing_token)?;
        apply_bearer_headers(headers, &token, &self.config.quota_project_id)
    }

    fn valid(&self) -> bool {
        self.token().is_some_and(|t| !t.is_expired(self.clock.now()))
    }

    async fn before_request(
        &self,
        client: &dyn HttpClient,
        _method: &Method,
        _url: &str,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        let token = self.valid_token(client).await?;
        apply_bearer_headers(headers, &token, &self.config.quota_project_id)
    }

    async fn project_id(&self, client: &dyn HttpClient) -> Result<Option<String>> {
        if let Some(project_id) = self.project.cached() {
            return Ok(Some(project_id));
        }
        if self.project.project_number().is_none() {
            return Ok(None);
        }
        let token = self.valid_token(client).await?;
        self.project
            .resolve(client, &token, &self.config.quota_project_id)
            .await
    }
}

/// A builder for external account credentials.
///
/// # Example
/// ```
/// # use google_cloud_workload_identity::credentials::external_account::Builder;
/// let project_number = "123456";
/// let pool_id = "my-pool";
/// let provider_id = "my-provider";
/// let audience = format!(
///     "//iam.googleapis.com/projects/{project_number}/locations/global/workloadIdentityPools/{pool_id}/providers/{provider_id}"
/// );
/// let config = serde_json::json!({
///     "type": "external_account",
///     "audience": audience,
///     "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
///     "token_url": "https://sts.googleapis.com/v1/token",
///     "credential_source": {
///         "url": format!("http://169.254.169.254/metadata/identity/oauth2/token?api-version=2018-02-01&resource={audience}"),
///         "headers": {
///           "Metadata": "True"
///         },
///         "format": {
///           "type": "json",
///           "subject_token_field_name": "access_token"
///         }
///     }
/// });
/// let credentials = Builder::new(config)
///     .with_quota_project_id("quota_project")
///     .with_scopes(["https://www.googleapis.com/auth/cloud-platform"])
///     .build();
/// assert!(credentials.is_ok());
/// ```
pub struct Builder {
    external_account_config: Value,
    quota_project_id: Option<String>,
    scopes: Option<Vec<String>>,
    resource_manager_url: Option<String>,
    clock: Option<Arc<dyn Clock>>,
}

impl Builder {
    /// Creates a new builder using [external_account_credentials] JSON value.
    ///
    /// [external_account_credentials]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage
    pub fn new(external_account_config: Value) -> Self {
        Self {
            external_account_config,
            quota_project_id: None,
            scopes: None,
            resource_manager_url: None,
            clock: None,
        }
    }

    /// Sets the [quota project] for this credentials.
    ///
    /// Overrides any `quota_project_id` in the configuration.
    ///
    /// [quota project]: https://cloud.google.com/docs/quotas/quota-project
    pub fn with_quota_project_id<S: Into<String>>(mut self, quota_project_id: S) -> Self {
        self.quota_project_id = Some(quota_project_id.into());
        self
    }

    /// Overrides the [scopes] for this credentials.
    ///
    /// [scopes]: https://developers.google.com/identity/protocols/oauth2/scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = Some(scopes.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Overrides the prefix of the project id lookup. The project number is
    /// appended to it.
    pub fn with_resource_manager_url<S: Into<String>>(mut self, url: S) -> Self {
        self.resource_manager_url = Some(url.into());
        self
    }

    /// Overrides the clock used to compute and check token expiration.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Returns a [Credentials] instance with the configured settings.
    ///
    /// # Errors
    ///
    /// Returns a [BuilderError] if the configuration cannot be deserialized,
    /// if the `credential_source` is missing, ambiguous, or uses an invalid
    /// format, or if the service account impersonation URL does not name a
    /// service account.
    pub fn build(self) -> BuildResult<Credentials> {
        Ok(Credentials::from(self.build_credentials()?))
    }

    /// Like [Builder::build], returning the concrete credentials type.
    pub fn build_credentials(self) -> BuildResult<ExternalAccountCredentials> {
        let file: ExternalAccountFile =
            serde_json::from_value(self.external_account_config).map_err(BuilderError::parsing)?;

        let credential_source = CredentialSource::try_from(file.credential_source)?;
        let target_principal = file
            .service_account_impersonation_url
            .as_deref()
            .map(target_principal)
            .transpose()?;

        let config = ExternalAccountConfig {
            audience: file.audience,
            subject_token_type: file.subject_token_type,
            token_url: file.token_url,
            service_account_impersonation_url: file.service_account_impersonation_url,
            target_principal,
            client_id: file.client_id,
            client_secret: file.client_secret,
            scopes: self.scopes.or(file.scopes).unwrap_or_default(),
            quota_project_id: self.quota_project_id.or(file.quota_project_id),
            credential_source,
            resource_manager_url: self
                .resource_manager_url
                .unwrap_or_else(|| CLOUD_RESOURCE_MANAGER_URL.to_string()),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        Ok(ExternalAccountCredentials::new(config, clock))
    }
}

/// Creates external account credentials from a parsed configuration.
pub fn from_info(info: Value) -> BuildResult<ExternalAccountCredentials> {
    Builder::new(info).build_credentials()
}

/// Creates external account credentials from a configuration file.
pub fn from_file<P: AsRef<Path>>(path: P) -> BuildResult<ExternalAccountCredentials> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(BuilderError::loading)?;
    let info: Value = serde_json::from_str(&contents).map_err(BuilderError::parsing)?;
    from_info(info)
}
