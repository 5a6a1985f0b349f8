// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::{Duration, Timestamp};
use core::cell::Cell;

fn initial() -> Timestamp {
    unsafe {
        // Safety: all testing timestamps share this epoch
        Timestamp::from_duration(Duration::from_micros(1))
    }
}

/// A manually advanced clock for deterministic tests
#[derive(Clone, Debug)]
pub struct Clock(Cell<Timestamp>);

impl Default for Clock {
    fn default() -> Self {
        Self(Cell::new(initial()))
    }
}

impl super::super::Clock for Clock {
    fn get_time(&self) -> Timestamp {
        self.0.get()
    }
}

impl Clock {
    /// Advances the clock by the given duration
    pub fn inc_by(&self, duration: Duration) {
        self.0.set(self.0.get() + duration);
    }

    /// Moves the clock to the given timestamp
    ///
    /// Panics if the timestamp is in the clock's past.
    pub fn advance_to(&self, time: Timestamp) {
        assert!(self.0.get().has_elapsed(time), "clock may not move backwards");
        self.0.set(time);
    }
}

/// Returns a timestamp at the testing epoch
pub fn now() -> Timestamp {
    initial()
}
