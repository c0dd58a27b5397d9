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
use crate::credentials::subject_token::{Format, SubjectTokenProvider};
use crate::errors::CredentialsError;
use crate::http::HttpClient;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FileSourcedCredentials {
    pub file: String,
    pub format: Format,
}

impl FileSourcedCredentials {
    pub(crate) fn new(file: String, format: Format) -> Self {
        Self { file, format }
    }
}

#[async_trait::async_trait]
impl SubjectTokenProvider for FileSourcedCredentials {
    async fn subject_token(&self, _client: &dyn HttpClient) -> Result<String> {
        tracing::debug!(file = %self.file, "reading subject token");
        let content = tokio::fs::read_to_string(&self.file)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CredentialsError::subject_token_with_source(
                    format!("File '{}' was not found.", self.file),
                    e,
                ),
                _ => CredentialsError::subject_token_with_source(
                    format!("Unable to read subject token file '{}'", self.file),
                    e,
                ),
            })?;
        self.format.extract(content, &self.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::MockHttpClient;
    use serde_json::json;
    use std::{error::Error, io::Write};
    use tempfile::NamedTempFile;

    type TestResult = anyhow::Result<()>;

    fn create_temp_file(content: &str) -> std::io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        file.write_all(content.as_bytes())?;
        Ok(file)
    }

    fn path(file: &NamedTempFile) -> String {
        file.path().to_string_lossy().to_string()
    }

    fn json_format() -> Format {
        Format::Json {
            subject_token_field_name: "access_token".into(),
        }
    }

    #[tokio::test]
    async fn get_text_token() -> TestResult {
        let file = create_temp_file("an_example_token")?;
        let token_provider = FileSourcedCredentials::new(path(&file), Format::Text);
        // Files never use the HTTP client.
        let client = MockHttpClient::new();
        let resp = token_provider.subject_token(&client).await?;
        assert_eq!(resp, "an_example_token");
        Ok(())
    }

    #[tokio::test]
    async fn get_json_token() -> TestResult {
        let response_body = json!({
            "access_token":"an_example_token",
        })
        .to_string();
        let file = create_temp_file(&response_body)?;
        let token_provider = FileSourcedCredentials::new(path(&file), json_format());
        let resp = token_provider
            .subject_token(&MockHttpClient::new())
            .await?;
        assert_eq!(resp, "an_example_token");
        Ok(())
    }

    #[tokio::test]
    async fn get_json_token_missing_field() -> TestResult {
        let response_body = json!({
            "wrong_field":"an_example_token",
        })
        .to_string();
        let file = create_temp_file(&response_body)?;
        let token_provider = FileSourcedCredentials::new(path(&file), json_format());
        let err = token_provider
            .subject_token(&MockHttpClient::new())
            .await
            .expect_err("parsing should fail");
        assert!(err.is_subject_token(), "{err:?}");
        assert!(!err.is_transient(), "{err:?}");
        assert!(err.to_string().contains(&path(&file)), "{err}");
        assert!(err.to_string().contains("'access_token'"), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn file_not_found() -> TestResult {
        let token_provider =
            FileSourcedCredentials::new("/path/to/non/existent/file".into(), Format::Text);
        let err = token_provider
            .subject_token(&MockHttpClient::new())
            .await
            .expect_err("file should not exist");
        assert!(err.is_subject_token(), "{err:?}");
        assert!(!err.is_transient(), "{err:?}");
        assert!(err.source().is_some(), "{err:?}");
        assert!(
            err.to_string()
                .starts_with("File '/path/to/non/existent/file' was not found."),
            "{err}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn get_text_token_from_empty_file() -> TestResult {
        let file = create_temp_file("")?;
        let token_provider = FileSourcedCredentials::new(path(&file), Format::Text);
        let err = token_provider
            .subject_token(&MockHttpClient::new())
            .await
            .expect_err("an empty token should fail");
        assert!(err.is_subject_token(), "{err:?}");
        assert!(err.to_string().contains("Missing subject_token"), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn get_json_token_from_empty_file() -> TestResult {
        let file = create_temp_file("")?;
        let token_provider = FileSourcedCredentials::new(path(&file), json_format());
        let err = token_provider
            .subject_token(&MockHttpClient::new())
            .await
            .expect_err("parsing should fail");
        assert!(err.is_subject_token(), "{err:?}");
        assert!(
            err.to_string().contains("Unable to parse subject_token"),
            "{err}"
        );
        Ok(())
    }
}
