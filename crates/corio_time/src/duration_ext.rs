// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use std::time::Duration;

/// Extension trait for [`Duration`].
pub trait DurationExt {
    /// Returns the number of whole minutes in the duration.
    fn as_minutes(&self) -> u64;

    /// Returns the number of whole hours in the duration.
    fn as_hours(&self) -> u64;

    /// Returns the number of whole days in the duration.
    fn as_days(&self) -> u64;
}

#[expect(clippy::integer_division, reason = "used operators for better clarity")]
impl DurationExt for Duration {
    fn as_minutes(&self) -> u64 {
        self.as_secs() / 60
    }

    fn as_hours(&self) -> u64 {
        self.as_minutes() / 60
    }

    fn as_days(&self) -> u64 {
        self.as_hours() / 24
    }
}
