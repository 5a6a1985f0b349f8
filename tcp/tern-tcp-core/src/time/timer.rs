// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::Timestamp;
use core::task::Poll;

/// A cancelable timer owned by an individual component
///
/// Timers do not register themselves anywhere; the owning connection
/// aggregates the earliest expiration and the driver polls them with the
/// current time. Canceling an already-fired timer is a no-op.
///
/// Note: the timer doesn't implement Copy to ensure it isn't accidentally
///       moved and have the expiration discarded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timer {
    expiration: Option<Timestamp>,
}

impl Timer {
    /// Sets the timer to expire at the given timestamp
    #[inline]
    pub fn set(&mut self, time: Timestamp) {
        self.expiration = Some(time);
    }

    /// Cancels the timer.
    /// After cancellation, a timer will no longer report as expired.
    #[inline]
    pub fn cancel(&mut self) {
        self.expiration = None;
    }

    /// Returns the expiration, if armed
    #[inline]
    pub fn expiration(&self) -> Option<Timestamp> {
        self.expiration
    }

    /// Returns true if the timer has expired
    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        match self.expiration {
            Some(timeout) => timeout.has_elapsed(now),
            _ => false,
        }
    }

    /// Returns true if the timer is armed
    #[inline]
    pub fn is_armed(&self) -> bool {
        self.expiration.is_some()
    }

    /// Notifies the timer of the current time.
    /// If the timer's expiration occurs before the current time, it will
    /// be cancelled. The method returns whether the timer was expired and
    /// had been cancelled.
    #[inline]
    pub fn poll_expiration(&mut self, now: Timestamp) -> Poll<()> {
        if self.is_expired(now) {
            self.cancel();
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}
