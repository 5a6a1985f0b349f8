// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;

#[cfg(feature = "alloc")]
use alloc::boxed::Box;

/// Round-trip time estimation contract
///
/// The connection feeds one sample per cumulative acknowledgment of a
/// never-retransmitted range (Karn's algorithm); the estimator folds the
/// samples into a smoothed estimate and a variation term used for the
/// retransmission timeout.
pub trait RttEstimator {
    /// Records a new round-trip time sample
    fn on_measurement(&mut self, sample: Duration);

    /// Returns the smoothed round-trip time estimate
    fn estimate(&self) -> Duration;

    /// Returns the variation in observed samples
    fn variation(&self) -> Duration;

    /// Discards all state accumulated from previous samples
    fn reset(&mut self);

    /// Creates an independent estimator with the same parameters and no
    /// accumulated samples, for a connection forked from a listener
    #[cfg(feature = "alloc")]
    fn fork(&self) -> Box<dyn RttEstimator + Send>;
}

//= https://www.rfc-editor.org/rfc/rfc6298#section-2
//# Until a round-trip time (RTT) measurement has been made for a
//# segment sent between the sender and receiver, the sender SHOULD
//# set RTO <- 1 second
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_secs(1);

const ZERO_DURATION: Duration = Duration::from_millis(0);

/// The smoothed mean / mean-deviation estimator of RFC 6298
///
/// `alpha` is fixed at 1/8 and `beta` at 1/4, expressed below as shifts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeanDeviation {
    /// Latest RTT sample
    latest_rtt: Duration,
    /// An exponentially-weighted moving average
    smoothed_rtt: Duration,
    /// The mean deviation of the observed samples
    rttvar: Duration,
    /// Whether a first sample has been folded in
    has_sample: bool,
}

impl Default for MeanDeviation {
    fn default() -> Self {
        Self::new()
    }
}

impl MeanDeviation {
    pub const fn new() -> Self {
        Self {
            latest_rtt: ZERO_DURATION,
            smoothed_rtt: DEFAULT_INITIAL_RTT,
            rttvar: ZERO_DURATION,
            has_sample: false,
        }
    }

    /// Gets the latest round trip time sample
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }
}

impl RttEstimator for MeanDeviation {
    fn on_measurement(&mut self, sample: Duration) {
        self.latest_rtt = sample.max(Duration::from_micros(1));

        if !self.has_sample {
            //= https://www.rfc-editor.org/rfc/rfc6298#section-2
            //# When the first RTT measurement R is made, the host MUST set
            //#
            //#    SRTT <- R
            //#    RTTVAR <- R/2
            self.has_sample = true;
            self.smoothed_rtt = self.latest_rtt;
            self.rttvar = self.latest_rtt / 2;
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc6298#section-2
        //# When a subsequent RTT measurement R' is made, a host MUST set
        //#
        //#    RTTVAR <- (1 - beta) * RTTVAR + beta * |SRTT - R'|
        //#    SRTT <- (1 - alpha) * SRTT + alpha * R'
        let rttvar_sample = abs_difference(self.smoothed_rtt, self.latest_rtt);
        self.rttvar = 3 * self.rttvar / 4 + rttvar_sample / 4;
        self.smoothed_rtt = 7 * self.smoothed_rtt / 8 + self.latest_rtt / 8;
    }

    fn estimate(&self) -> Duration {
        self.smoothed_rtt
    }

    fn variation(&self) -> Duration {
        self.rttvar
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    #[cfg(feature = "alloc")]
    fn fork(&self) -> Box<dyn RttEstimator + Send> {
        Box::new(Self::new())
    }
}

fn abs_difference(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}
