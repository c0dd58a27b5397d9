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
use crate::errors::CredentialsError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// The time remaining for a logical operation that spans several requests.
///
/// Each nested step runs through [TimeBudget::guard]. The guard fails fast if
/// the budget is already exhausted, cancels the step if the budget runs out
/// while waiting, and otherwise deducts the elapsed time. A budget created
/// with `None` imposes no limit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct TimeBudget {
    remaining: Option<Duration>,
}

impl TimeBudget {
    pub(crate) fn new(max_allowed_time: Option<Duration>) -> Self {
        Self {
            remaining: max_allowed_time,
        }
    }

    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.remaining
    }

    pub(crate) async fn guard<F, T>(&mut self, step: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let Some(remaining) = self.remaining else {
            return future.await;
        };
        if remaining.is_zero() {
            return Err(exhausted(step));
        }
        let start = Instant::now();
        let result = tokio::time::timeout(remaining, future)
            .await
            .map_err(|_| exhausted(step))?;
        self.remaining = Some(remaining.saturating_sub(start.elapsed()));
        result
    }
}

fn exhausted(step: &str) -> CredentialsError {
    CredentialsError::timeout(format!("the time budget was exhausted during {step}"))
}
