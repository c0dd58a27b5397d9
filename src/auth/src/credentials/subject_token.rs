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

//! Subject tokens: the externally issued credentials presented to STS.

use super::external_account_sources::file_sourced::FileSourcedCredentials;
use super::external_account_sources::url_sourced::UrlSourcedCredentials;
use crate::build_errors::Error as BuilderError;
use crate::errors::CredentialsError;
use crate::http::HttpClient;
use crate::{BuildResult, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const TEXT_FORMAT_TYPE: &str = "text";
const JSON_FORMAT_TYPE: &str = "json";

/// The `credential_source.format` object in an external account config.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub(crate) struct CredentialSourceFormat {
    #[serde(rename = "type")]
    pub format_type: Option<String>,
    pub subject_token_field_name: Option<String>,
}

/// How the subject token is stored in the file or URL response.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Format {
    /// The whole content is the token.
    Text,
    /// The content is a JSON object, the token is in the named field.
    Json { subject_token_field_name: String },
}

impl Format {
    pub(crate) fn new(format: Option<CredentialSourceFormat>) -> BuildResult<Self> {
        let format = format.unwrap_or_default();
        match format.format_type.as_deref().unwrap_or_default() {
            "" | TEXT_FORMAT_TYPE => Ok(Self::Text),
            JSON_FORMAT_TYPE => match format.subject_token_field_name {
                Some(name) if !name.is_empty() => Ok(Self::Json {
                    subject_token_field_name: name,
                }),
                _ => Err(BuilderError::invalid_credential_source(
                    "Missing subject_token_field_name for JSON credential_source format",
                )),
            },
            other => Err(BuilderError::invalid_credential_source(format!(
                "Invalid credential_source format '{other}'"
            ))),
        }
    }

    /// Extracts the subject token from `content` read from `origin`.
    pub(crate) fn extract(&self, content: String, origin: &str) -> Result<String> {
        let token = match self {
            Self::Text => content,
            Self::Json {
                subject_token_field_name,
            } => {
                let parse_error = || {
                    CredentialsError::subject_token(format!(
                        "Unable to parse subject_token from JSON file '{origin}' using key '{subject_token_field_name}'"
                    ))
                };
                let document: Value = serde_json::from_str(&content).map_err(|_| parse_error())?;
                match document.get(subject_token_field_name) {
                    Some(Value::String(token)) => token.clone(),
                    _ => return Err(parse_error()),
                }
            }
        };
        if token.is_empty() {
            return Err(CredentialsError::subject_token(
                "Missing subject_token in the credential_source file",
            ));
        }
        Ok(token)
    }
}

/// Retrieves subject tokens.
#[async_trait::async_trait]
pub(crate) trait SubjectTokenProvider: std::fmt::Debug + Send + Sync {
    async fn subject_token(&self, client: &dyn HttpClient) -> Result<String>;
}

/// The closed set of subject token sources.
#[derive(Debug, Clone)]
pub(crate) enum CredentialSource {
    File(FileSourcedCredentials),
    Url(UrlSourcedCredentials),
}

#[async_trait::async_trait]
impl SubjectTokenProvider for CredentialSource {
    async fn subject_token(&self, client: &dyn HttpClient) -> Result<String> {
        match self {
            Self::File(source) => source.subject_token(client).await,
            Self::Url(source) => source.subject_token(client).await,
        }
    }
}
