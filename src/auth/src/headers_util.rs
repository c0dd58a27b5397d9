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
use crate::constants::QUOTA_PROJECT_KEY;
use crate::errors::CredentialsError;
use crate::token::Token;

use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};

/// Inserts the authorization and quota project headers for `token`.
///
/// Existing values for those headers are replaced, all other headers are
/// preserved.
pub(crate) fn apply_bearer_headers(
    headers: &mut HeaderMap,
    token: &Token,
    quota_project_id: &Option<String>,
) -> Result<()> {
    let mut value = HeaderValue::from_str(&format!("{} {}", token.token_type, token.token))
        .map_err(|e| CredentialsError::from_source(false, e))?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);

    if let Some(project) = quota_project_id {
        headers.insert(
            HeaderName::from_static(QUOTA_PROJECT_KEY),
            HeaderValue::from_str(project).map_err(|e| CredentialsError::from_source(false, e))?,
        );
    }
    Ok(())
}

/// A utility function to create bearer headers.
pub(crate) fn build_bearer_headers(
    token: &Token,
    quota_project_id: &Option<String>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    apply_bearer_headers(&mut headers, token, quota_project_id)?;
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    // Helper to create test tokens
    fn create_test_token(token: &str, token_type: &str) -> Token {
        Token {
            token: token.to_string(),
            token_type: token_type.to_string(),
            expires_at: None,
            metadata: None,
        }
    }

    #[test]
    fn build_bearer_headers_basic_success() {
        let token = create_test_token("test_token", "Bearer");
        let headers = build_bearer_headers(&token, &None).unwrap();

        assert_eq!(headers.len(), 1, "{headers:?}");
        let value = headers
            .get(HeaderName::from_static("authorization"))
            .unwrap();

        assert_eq!(value, HeaderValue::from_static("Bearer test_token"));
        assert!(value.is_sensitive());
    }

    #[test]
    fn build_bearer_headers_with_quota_project_success() {
        let token = create_test_token("test_token", "Bearer");
        let quota_project_id = Some("test-project-123".to_string());
        let headers = build_bearer_headers(&token, &quota_project_id).unwrap();
        assert_eq!(headers.len(), 2, "{headers:?}");

        let token = headers
            .get(HeaderName::from_static("authorization"))
            .unwrap();
        assert_eq!(token, HeaderValue::from_static("Bearer test_token"));
        assert!(token.is_sensitive());

        let quota_project = headers
            .get(HeaderName::from_static(QUOTA_PROJECT_KEY))
            .unwrap();
        assert_eq!(quota_project, HeaderValue::from_static("test-project-123"));
    }

    #[test]
    fn apply_preserves_other_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-custom", HeaderValue::from_static("keep-me"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));

        let token = create_test_token("fresh", "Bearer");
        apply_bearer_headers(&mut headers, &token, &None).unwrap();
        assert_eq!(headers.len(), 2, "{headers:?}");
        assert_eq!(
            headers.get(AUTHORIZATION),
            Some(&HeaderValue::from_static("Bearer fresh"))
        );
        assert_eq!(
            headers.get("x-custom"),
            Some(&HeaderValue::from_static("keep-me"))
        );
    }

    #[test]
    fn build_bearer_headers_different_token_type() {
        let token = create_test_token("special_token", "MAC");
        let headers = build_bearer_headers(&token, &None).unwrap();
        assert_eq!(headers.len(), 1, "{headers:?}");

        let token = headers
            .get(HeaderName::from_static("authorization"))
            .unwrap();
        assert_eq!(token, HeaderValue::from_static("MAC special_token"));
        assert!(token.is_sensitive());
    }

    #[test]
    fn build_bearer_headers_invalid_token() {
        let token = create_test_token("token with \n invalid chars", "Bearer");

        let error = build_bearer_headers(&token, &None).unwrap_err();
        assert!(!error.is_transient(), "{error:?}");
        let source = error
            .source()
            .and_then(|e| e.downcast_ref::<http::header::InvalidHeaderValue>());
        assert!(
            matches!(source, Some(http::header::InvalidHeaderValue { .. })),
            "{error:?}"
        );
    }
}
