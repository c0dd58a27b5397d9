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

//! An HTTP session that authorizes each request with [Credentials].
//!
//! [AuthorizedSession] attaches the credentials to every request. When the
//! service rejects the credentials, with `401 Unauthorized` by default, the
//! session forces a refresh and sends the request again, up to a maximum
//! number of attempts.
//!
//! # Example
//! ```no_run
//! # use google_cloud_workload_identity::credentials::external_account;
//! # use google_cloud_workload_identity::http::ReqwestClient;
//! # use google_cloud_workload_identity::session::{AuthorizedSession, RequestOptions};
//! # use http::{HeaderMap, Method};
//! # tokio_test::block_on(async {
//! let credentials = external_account::Builder::new(serde_json::json!({
//!     "audience": "//iam.googleapis.com/projects/123456/locations/global/workloadIdentityPools/my-pool/providers/my-provider",
//!     "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
//!     "token_url": "https://sts.googleapis.com/v1/token",
//!     "credential_source": { "file": "/var/run/secrets/token" },
//! }))
//! .build()?;
//! let session = AuthorizedSession::builder(credentials, ReqwestClient::new()).build();
//! let response = session
//!     .request(
//!         Method::GET,
//!         "https://storage.googleapis.com/storage/v1/b?project=my-project",
//!         &HeaderMap::new(),
//!         None,
//!         RequestOptions::default(),
//!     )
//!     .await?;
//! println!("{}", response.text());
//! # Ok::<(), anyhow::Error>(())
//! # });
//! ```

use crate::Result;
use crate::budget::TimeBudget;
use crate::credentials::Credentials;
use crate::errors::CredentialsError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const DEFAULT_MAX_REFRESH_ATTEMPTS: u32 = 2;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Per-call options for [AuthorizedSession::request].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RequestOptions {
    /// The timeout for each request sent by the call, including refreshes.
    pub timeout: Option<Duration>,
    /// The overall time allowed for the call, across all its requests.
    pub max_allowed_time: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            max_allowed_time: None,
        }
    }
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_allowed_time(mut self, max_allowed_time: Option<Duration>) -> Self {
        self.max_allowed_time = max_allowed_time;
        self
    }
}

/// Sends requests authorized with [Credentials].
///
/// Clones share the credentials and the refresh lock.
#[derive(Clone, Debug)]
pub struct AuthorizedSession {
    credentials: Credentials,
    client: Arc<dyn HttpClient>,
    auth_client: Option<Arc<dyn HttpClient>>,
    refresh_status_codes: Vec<StatusCode>,
    max_refresh_attempts: u32,
    refresh_timeout: Option<Duration>,
    refresh_lock: Arc<Mutex<()>>,
}

impl AuthorizedSession {
    /// Creates a session with the default configuration.
    pub fn new<C>(credentials: Credentials, client: C) -> Self
    where
        C: HttpClient + 'static,
    {
        Self::builder(credentials, client).build()
    }

    pub fn builder<C>(credentials: Credentials, client: C) -> Builder
    where
        C: HttpClient + 'static,
    {
        Builder::new(credentials, Arc::new(client))
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Sends a request, refreshing the credentials and retrying if the
    /// response status is one of the refresh status codes.
    ///
    /// The caller's `headers` are copied, never modified. Once the refresh
    /// attempts are exhausted the last response is returned as-is.
    ///
    /// # Errors
    ///
    /// Fails if the credentials cannot be refreshed, if the request cannot be
    /// sent, or if `options.max_allowed_time` elapses. The latter is reported
    /// as a timeout, see [CredentialsError::is_timeout].
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<Bytes>,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let mut budget = TimeBudget::new(options.max_allowed_time);
        let credentials = &self.credentials;
        let auth_client = WithTimeout {
            inner: self.auth_client.as_deref().unwrap_or(self.client.as_ref()),
            timeout: self.refresh_timeout.or(options.timeout),
        };
        let mut attempt = 0;
        loop {
            let mut request_headers = headers.clone();
            budget
                .guard(
                    "the credentials refresh",
                    credentials.before_request(&auth_client, &method, url, &mut request_headers),
                )
                .await?;

            let timeout = match (options.timeout, budget.remaining()) {
                (Some(t), Some(r)) => Some(t.min(r)),
                (t, r) => t.or(r),
            };
            let mut request = HttpRequest::new(method.clone(), url)
                .with_headers(request_headers)
                .with_timeout(timeout);
            if let Some(body) = &body {
                request = request.with_body(body.clone());
            }
            let response = budget
                .guard("the request", self.client.send(request))
                .await?;

            if attempt >= self.max_refresh_attempts
                || !self.refresh_status_codes.contains(&response.status)
            {
                return Ok(response);
            }
            attempt += 1;
            tracing::info!(
                "refreshing credentials due to a {} response, attempt {attempt}/{}",
                response.status,
                self.max_refresh_attempts
            );
            let _lock = budget
                .guard("the refresh lock", async {
                    Ok::<_, CredentialsError>(self.refresh_lock.lock().await)
                })
                .await?;
            budget
                .guard(
                    "the credentials refresh",
                    self.credentials.refresh(&auth_client),
                )
                .await?;
        }
    }
}

/// A builder for [AuthorizedSession].
#[derive(Debug)]
pub struct Builder {
    credentials: Credentials,
    client: Arc<dyn HttpClient>,
    auth_client: Option<Arc<dyn HttpClient>>,
    refresh_status_codes: Vec<StatusCode>,
    max_refresh_attempts: u32,
    refresh_timeout: Option<Duration>,
}

impl Builder {
    fn new(credentials: Credentials, client: Arc<dyn HttpClient>) -> Self {
        Self {
            credentials,
            client,
            auth_client: None,
            refresh_status_codes: vec![StatusCode::UNAUTHORIZED],
            max_refresh_attempts: DEFAULT_MAX_REFRESH_ATTEMPTS,
            refresh_timeout: None,
        }
    }

    /// The response statuses that trigger a refresh and retry.
    pub fn with_refresh_status_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = StatusCode>,
    {
        self.refresh_status_codes = codes.into_iter().collect();
        self
    }

    /// The maximum number of refreshes, and therefore retries, per call.
    pub fn with_max_refresh_attempts(mut self, attempts: u32) -> Self {
        self.max_refresh_attempts = attempts;
        self
    }

    /// Bounds each request sent to refresh the credentials.
    ///
    /// Defaults to the per-call [RequestOptions::timeout].
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = Some(timeout);
        self
    }

    /// Sends the refresh requests through a different client.
    pub fn with_auth_client<C>(mut self, client: C) -> Self
    where
        C: HttpClient + 'static,
    {
        self.auth_client = Some(Arc::new(client));
        self
    }

    pub fn build(self) -> AuthorizedSession {
        AuthorizedSession {
            credentials: self.credentials,
            client: self.client,
            auth_client: self.auth_client,
            refresh_status_codes: self.refresh_status_codes,
            max_refresh_attempts: self.max_refresh_attempts,
            refresh_timeout: self.refresh_timeout,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Applies a timeout to every request sent through `inner`.
#[derive(Debug)]
struct WithTimeout<'a> {
    inner: &'a dyn HttpClient,
    timeout: Option<Duration>,
}

#[async_trait::async_trait]
impl<'a> HttpClient for WithTimeout<'a> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = match self.timeout {
            Some(timeout) => request.with_timeout(Some(timeout)),
            None => request,
        };
        self.inner.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::FakeCredentials;
    use crate::http::tests::MockHttpClient;
    use http::header::{AUTHORIZATION, HeaderValue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_case::test_case;

    type TestResult = anyhow::Result<()>;

    const URL: &str = "https://example.com/resource";

    fn authorization(request: &HttpRequest) -> Option<&str> {
        request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }

    fn ok() -> Result<HttpResponse> {
        Ok(HttpResponse::new(StatusCode::OK, "ok"))
    }

    fn unauthorized() -> Result<HttpResponse> {
        Ok(HttpResponse::new(StatusCode::UNAUTHORIZED, "unauthorized"))
    }

    async fn get(session: &AuthorizedSession, options: RequestOptions) -> Result<HttpResponse> {
        session
            .request(Method::GET, URL, &HeaderMap::new(), None, options)
            .await
    }

    #[tokio::test]
    async fn success_without_retry() -> TestResult {
        let fake = FakeCredentials::default();
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .times(1)
            .withf(|r| {
                r.method == Method::POST
                    && r.url == URL
                    && authorization(r) == Some("Bearer token-1")
                    && r.headers.get("x-custom") == Some(&HeaderValue::from_static("custom"))
                    && r.body.as_deref() == Some(b"payload".as_slice())
                    && r.timeout == Some(DEFAULT_TIMEOUT)
            })
            .returning(|_| ok());
        let session = AuthorizedSession::new(Credentials::from(fake.clone()), client);

        let mut headers = HeaderMap::new();
        headers.insert("x-custom", HeaderValue::from_static("custom"));
        let response = session
            .request(
                Method::POST,
                URL,
                &headers,
                Some(Bytes::from_static(b"payload")),
                RequestOptions::default(),
            )
            .await?;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(fake.refresh_count(), 1);

        // The caller's headers are not modified.
        assert_eq!(headers.len(), 1, "{headers:?}");
        assert!(!headers.contains_key(AUTHORIZATION), "{headers:?}");
        Ok(())
    }

    #[tokio::test]
    async fn refresh_and_retry_on_unauthorized() -> TestResult {
        let fake = FakeCredentials::default();
        let mut client = MockHttpClient::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|r| authorization(r) == Some("Bearer token-1"))
            .returning(|_| unauthorized());
        client
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|r| authorization(r) == Some("Bearer token-2"))
            .returning(|_| ok());
        let session = AuthorizedSession::new(Credentials::from(fake.clone()), client);

        let response = get(&session, RequestOptions::default()).await?;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(fake.refresh_count(), 2);
        Ok(())
    }

    #[test_case(0, 1; "no retries")]
    #[test_case(1, 2; "one retry")]
    #[test_case(2, 3; "default retries")]
    #[test_case(5, 6; "many retries")]
    #[tokio::test]
    async fn retries_are_bounded(max_attempts: u32, want_sends: usize) -> TestResult {
        let fake = FakeCredentials::default();
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .times(want_sends)
            .returning(|_| unauthorized());
        let session = AuthorizedSession::builder(Credentials::from(fake.clone()), client)
            .with_max_refresh_attempts(max_attempts)
            .build();

        let response = get(&session, RequestOptions::default()).await?;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(fake.refresh_count(), want_sends);
        Ok(())
    }

    #[test_case(StatusCode::FORBIDDEN)]
    #[test_case(StatusCode::NOT_FOUND)]
    #[test_case(StatusCode::SERVICE_UNAVAILABLE)]
    #[tokio::test]
    async fn other_statuses_are_returned(status: StatusCode) -> TestResult {
        let fake = FakeCredentials::default();
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .times(1)
            .returning(move |_| Ok(HttpResponse::new(status, "error")));
        let session = AuthorizedSession::new(Credentials::from(fake.clone()), client);

        let response = get(&session, RequestOptions::default()).await?;
        assert_eq!(response.status, status);
        assert_eq!(fake.refresh_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn custom_refresh_status_codes() -> TestResult {
        let fake = FakeCredentials::default();
        let mut client = MockHttpClient::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(StatusCode::FORBIDDEN, "forbidden")));
        client
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| unauthorized());
        let session = AuthorizedSession::builder(Credentials::from(fake.clone()), client)
            .with_refresh_status_codes([StatusCode::FORBIDDEN])
            .build();

        let response = get(&session, RequestOptions::default()).await?;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(fake.refresh_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_failure_aborts_the_call() -> TestResult {
        let fake = FakeCredentials {
            fail_refresh: true,
            ..FakeCredentials::default()
        };
        let mut client = MockHttpClient::new();
        client.expect_send().never();
        let session = AuthorizedSession::new(Credentials::from(fake.clone()), client);

        let err = get(&session, RequestOptions::default()).await.unwrap_err();
        assert!(
            err.to_string().contains("test-only refresh failure"),
            "{err}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn transport_errors_are_not_retried() -> TestResult {
        let fake = FakeCredentials::default();
        let mut client = MockHttpClient::new();
        client.expect_send().times(1).returning(|_| {
            Err(CredentialsError::transport(
                "cannot connect",
                std::io::Error::other("connection refused"),
            ))
        });
        let session = AuthorizedSession::new(Credentials::from(fake.clone()), client);

        let err = get(&session, RequestOptions::default()).await.unwrap_err();
        assert!(err.is_transport(), "{err:?}");
        assert_eq!(fake.refresh_count(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhausted_during_refresh() -> TestResult {
        let fake = FakeCredentials {
            refresh_delay: Duration::from_secs(10),
            ..FakeCredentials::default()
        };
        let mut client = MockHttpClient::new();
        client.expect_send().never();
        let session = AuthorizedSession::new(Credentials::from(fake.clone()), client);

        let options = RequestOptions::default().with_max_allowed_time(Some(Duration::from_secs(5)));
        let err = get(&session, options).await.unwrap_err();
        assert!(err.is_timeout(), "{err:?}");
        assert!(!err.is_transport(), "{err:?}");
        // A cancelled refresh does not make the credentials valid.
        assert!(!session.credentials().valid());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn budget_spans_retries() -> TestResult {
        // Each refresh takes 3s, the first succeeds, the forced refresh is
        // cancelled once the 5s budget runs out.
        let fake = FakeCredentials {
            refresh_delay: Duration::from_secs(3),
            ..FakeCredentials::default()
        };
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .times(1)
            .withf(|r| r.timeout.is_some_and(|t| t <= Duration::from_secs(2)))
            .returning(|_| unauthorized());
        let session = AuthorizedSession::new(Credentials::from(fake.clone()), client);

        let options = RequestOptions::default().with_max_allowed_time(Some(Duration::from_secs(5)));
        let err = get(&session, options).await.unwrap_err();
        assert!(err.is_timeout(), "{err:?}");
        assert_eq!(fake.refresh_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_uses_auth_client() -> TestResult {
        #[derive(Debug, Default)]
        struct CountingClient(Arc<AtomicUsize>);

        #[async_trait::async_trait]
        impl HttpClient for CountingClient {
            async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
                self.0.fetch_add(1, Ordering::SeqCst);
                ok()
            }
        }

        #[derive(Debug)]
        struct RefreshThroughClient;

        #[async_trait::async_trait]
        impl crate::credentials::CredentialsProvider for RefreshThroughClient {
            async fn refresh(&self, client: &dyn HttpClient) -> Result<()> {
                client
                    .send(HttpRequest::new(Method::POST, "https://sts.example.com"))
                    .await
                    .map(|_| ())
            }
            fn apply(&self, headers: &mut HeaderMap) -> Result<()> {
                headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer test"));
                Ok(())
            }
            fn valid(&self) -> bool {
                false
            }
            async fn project_id(&self, _client: &dyn HttpClient) -> Result<Option<String>> {
                Ok(None)
            }
        }

        let auth_calls = Arc::new(AtomicUsize::new(0));
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .times(1)
            .withf(|r| r.url == URL)
            .returning(|_| ok());
        let session = AuthorizedSession::builder(Credentials::from(RefreshThroughClient), client)
            .with_auth_client(CountingClient(auth_calls.clone()))
            .build();

        get(&session, RequestOptions::default()).await?;
        assert_eq!(auth_calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_are_serialized() -> TestResult {
        const CALLS: usize = 4;
        let fake = FakeCredentials {
            refresh_delay: Duration::from_millis(50),
            ..FakeCredentials::default()
        };
        let sends = Arc::new(AtomicUsize::new(0));
        let counter = sends.clone();
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .times(2 * CALLS)
            .returning(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                unauthorized()
            });
        let session = AuthorizedSession::builder(Credentials::from(fake.clone()), client)
            .with_max_refresh_attempts(1)
            .build();
        // Start with a valid token so each call goes straight to the request.
        session.credentials().refresh(&MockHttpClient::new()).await?;

        let tasks = (0..CALLS)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { get(&session, RequestOptions::default()).await })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            let response = task.await??;
            assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        }
        assert_eq!(sends.load(Ordering::SeqCst), 2 * CALLS);
        // No coalescing, each call performs its own refresh.
        assert_eq!(fake.refresh_count(), CALLS + 1);
        assert_eq!(fake.peak_concurrent_refreshes(), 1);
        Ok(())
    }
}
