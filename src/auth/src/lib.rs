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

//! Google Cloud Client Libraries for Rust - Workload Identity Federation
//!
//! **WARNING:** this crate is under active development. We expect multiple
//! breaking changes in the upcoming releases. Testing is also incomplete, we do
//! **not** recommend that you use this crate in production. We welcome feedback
//! about the APIs, documentation, missing features, bugs, etc.
//!
//! This crate lets workloads running outside Google Cloud authenticate with
//! [Workload Identity Federation]. A token issued by an external identity
//! provider, read from a file or fetched from a URL, is exchanged with the
//! Security Token Service for a Google Cloud access token. Optionally the
//! access token impersonates a service account.
//!
//! [credentials::external_account::Builder] creates the credentials and
//! [session::AuthorizedSession] sends requests authorized with them,
//! refreshing the credentials when the service rejects them.
//!
//! [Workload Identity Federation]: https://cloud.google.com/iam/docs/workload-identity-federation

pub mod build_errors;
pub mod clock;
pub mod errors;

/// Types and functions to work with Google Cloud authentication [Credentials].
///
/// [Credentials]: https://cloud.google.com/docs/authentication#credentials
pub mod credentials;

pub mod http;

pub mod session;

/// Types and functions to work with auth [Tokens].
///
/// [Tokens]: https://cloud.google.com/docs/authentication#token
pub mod token;

pub(crate) mod budget;
pub(crate) mod constants;
pub(crate) mod headers_util;

/// A `Result` alias where the `Err` case is
/// `google_cloud_workload_identity::errors::CredentialsError`.
pub type Result<T> = std::result::Result<T, crate::errors::CredentialsError>;

/// A `Result` alias where the `Err` case is
/// `google_cloud_workload_identity::build_errors::Error`.
pub type BuildResult<T> = std::result::Result<T, crate::build_errors::Error>;
