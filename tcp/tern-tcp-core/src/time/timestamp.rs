// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{fmt, ops, time::Duration};

/// An absolute point in time, measured against the epoch of the `Clock`
/// that produced it.
///
/// `Timestamp`s from different clocks must never be compared; all code in
/// this workspace derives timestamps from the single clock the connection
/// was constructed with.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// Creates a `Timestamp` from a `Duration` since the clock epoch
    ///
    /// # Safety
    ///
    /// The caller must guarantee the duration was measured against the
    /// same clock epoch as every other `Timestamp` it will be compared
    /// with.
    #[inline]
    pub const unsafe fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    /// Returns the `Duration` since the clock epoch
    ///
    /// # Safety
    ///
    /// The returned value is only meaningful relative to the originating
    /// clock epoch.
    #[inline]
    pub const unsafe fn as_duration(self) -> Duration {
        self.0
    }

    /// Returns true if the `Timestamp` has occurred at `now`
    #[inline]
    pub fn has_elapsed(self, now: Self) -> bool {
        self <= now
    }

    /// Returns the `Duration` from `earlier` to `self`, or zero if
    /// `earlier` is actually later.
    #[inline]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Timestamp({:?})", self.0)
    }
}

impl ops::Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}

impl ops::AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs;
    }
}

impl ops::Sub<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 - rhs)
    }
}

impl ops::Sub for Timestamp {
    type Output = Duration;

    /// Returns the `Duration` between two timestamps
    ///
    /// Panics if `rhs` is later than `self`.
    #[inline]
    fn sub(self, rhs: Timestamp) -> Duration {
        self.0 - rhs.0
    }
}
