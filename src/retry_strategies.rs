// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

use std::time::Duration;

/// Retry schedule for command execution: a fixed pause between a bounded
/// number of additional attempts. The schedule is handed out as an iterator
/// of pauses; when it runs dry, the last error is surfaced.
#[derive(Clone, Debug)]
pub(crate) struct RetryStrategy {
    attempts: usize,
    interval: Duration,
}

impl RetryStrategy {
    pub(crate) fn new(attempts: usize, interval: Duration) -> RetryStrategy {
        RetryStrategy { attempts, interval }
    }

    pub(crate) fn intervals(&self) -> impl Iterator<Item = Duration> {
        std::iter::repeat(self.interval).take(self.attempts)
    }
}
