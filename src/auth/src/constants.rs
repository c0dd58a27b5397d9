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

/// Token Exchange OAuth Grant Type
pub(crate) const TOKEN_EXCHANGE_GRANT_TYPE: &str =
    "urn:ietf:params:oauth:grant-type:token-exchange";
/// Access Token Oauth Token Type
pub(crate) const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
/// JWT OAuth Token Type
#[cfg(test)]
pub(crate) const JWT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";

/// The scope requested from STS when an impersonation hop follows.
pub(crate) const IAM_SCOPE: &str = "https://www.googleapis.com/auth/iam";

/// Prefix of the resource manager lookup, the project number is appended.
pub(crate) const CLOUD_RESOURCE_MANAGER_URL: &str =
    "https://cloudresourcemanager.googleapis.com/v1/projects/";

/// The header used to attribute quota and billing.
pub(crate) const QUOTA_PROJECT_KEY: &str = "x-goog-user-project";

/// Tokens expiring within this margin are treated as already expired.
pub(crate) const CLOCK_SKEW: time::Duration = time::Duration::seconds(10);

/// The lifetime requested for impersonated access tokens.
pub(crate) const IMPERSONATED_TOKEN_LIFETIME: &str = "3600s";
