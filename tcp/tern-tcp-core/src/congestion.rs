// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Congestion control contracts
//!
//! The connection engine drives the machinery of RFC 5681/6675 (duplicate
//! ack counting, recovery entry and exit, retransmission ordering) and
//! delegates all window math to a pluggable [`CongestionControl`] and
//! [`RecoveryOps`] pair, selected at connection construction and held as
//! boxed trait objects.

use crate::state;
use core::time::Duration;

#[cfg(feature = "alloc")]
use alloc::boxed::Box;

/// The congestion state machine, subordinate to the connection lifecycle
///
/// Only meaningful while the connection can hold data in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CongestionState {
    /// No loss indications outstanding
    #[default]
    Open,
    /// Duplicate acks observed; possible reordering, no loss confirmed
    Disorder,
    /// Fast retransmit triggered; retransmitting under the recovery
    /// algorithm's window
    Recovery,
    /// The retransmission timer expired; window collapsed to one segment
    Loss,
}

impl CongestionState {
    state::event! {
        /// The first duplicate ack arrived
        on_dup_ack(Open => Disorder);
        /// The duplicate ack threshold was reached or SACK confirmed a loss
        enter_recovery(Open | Disorder => Recovery);
        /// The retransmission timer expired
        enter_loss(Open | Disorder | Recovery | Loss => Loss);
        /// A cumulative ack covered the recovery point
        exit_to_open(Disorder | Recovery | Loss => Open);
    }

    state::is!(is_open, Open);
    state::is!(is_disorder, Disorder);
    state::is!(is_recovery, Recovery);
    state::is!(is_loss, Loss);
}

/// Notable events forwarded to the congestion-control strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CongestionEvent {
    /// First transmission after an idle period
    TxStart,
    /// The CWR-marked segment completing an ECN backoff was acked
    CompleteCwr,
    /// An ack arrived without a congestion indication
    EcnNoCe,
    /// The IP layer reported congestion experienced on a received segment
    EcnIsCe,
    /// An ack was withheld by the delayed-ack machinery
    DelayedAck,
    /// An ack was sent without delay
    NonDelayedAck,
}

/// Shared window bookkeeping mutated by the engine and the strategies
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowState {
    /// The peer's advertised receive window, after scaling, in bytes
    pub advertised_window: u32,
    /// The congestion window in bytes
    pub cwnd: u32,
    /// The slow start threshold in bytes
    pub ssthresh: u32,
    /// Bytes sent but not yet cumulatively acknowledged
    pub bytes_in_flight: u32,
    /// The negotiated maximum segment size in bytes
    pub segment_size: u16,
    /// Window scale shift applied to windows we advertise
    pub snd_wind_shift: u8,
    /// Window scale shift applied to windows the peer advertises
    pub rcv_wind_shift: u8,
}

impl WindowState {
    pub fn new(segment_size: u16, initial_cwnd: u32, initial_ssthresh: u32) -> Self {
        Self {
            advertised_window: 0,
            cwnd: initial_cwnd,
            ssthresh: initial_ssthresh,
            bytes_in_flight: 0,
            segment_size,
            snd_wind_shift: 0,
            rcv_wind_shift: 0,
        }
    }

    /// The number of bytes the windows currently permit sending
    ///
    //= https://www.rfc-editor.org/rfc/rfc5681#section-3.1
    //# the sender can
    //# transmit up to the minimum of the congestion window (cwnd) and
    //# the advertised window.
    #[inline]
    pub fn available_window(&self) -> u32 {
        self.advertised_window
            .min(self.cwnd)
            .saturating_sub(self.bytes_in_flight)
    }

    /// Restores the congestion window floor of one segment
    ///
    /// Invariant: `cwnd >= segment_size` at all times after a recovery or
    /// loss episode.
    #[inline]
    pub fn apply_cwnd_floor(&mut self) {
        self.cwnd = self.cwnd.max(self.segment_size as u32);
    }

    #[inline]
    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }
}

/// A delivery-rate sample for rate-based congestion control
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateSample {
    /// Bytes delivered over the sample interval
    pub delivered: u32,
    /// The elapsed time over which `delivered` was measured
    pub interval: Duration,
}

/// The congestion-control strategy contract
///
/// Implementations never observe segments directly; the engine reports
/// acked segment counts, RTT samples, and state changes, and the strategy
/// adjusts the shared [`WindowState`].
pub trait CongestionControl {
    /// Computes the slow start threshold after a loss event
    fn ssthresh(&mut self, window: &WindowState, bytes_in_flight: u32) -> u32;

    /// Grows the congestion window in response to acked segments
    fn increase_window(&mut self, window: &mut WindowState, segs_acked: u32);

    /// Reports a congestion state transition
    fn congestion_state_set(&mut self, _window: &mut WindowState, _state: CongestionState) {}

    /// Reports a notable congestion event
    fn cwnd_event(&mut self, _window: &mut WindowState, _event: CongestionEvent) {}

    /// Reports segments acked together with the associated RTT estimate
    fn pkts_acked(&mut self, _window: &WindowState, _segs_acked: u32, _rtt: Duration) {}

    /// Full window control for rate-based algorithms; only invoked when
    /// [`CongestionControl::has_cong_control`] returns true
    fn cong_control(&mut self, _window: &mut WindowState, _sample: &RateSample) {}

    /// Returns true if the algorithm takes full control of the window via
    /// [`CongestionControl::cong_control`]
    fn has_cong_control(&self) -> bool {
        false
    }

    /// Creates an independent instance with fresh state, for a connection
    /// forked from a listener
    #[cfg(feature = "alloc")]
    fn fork(&self) -> Box<dyn CongestionControl + Send>;
}

/// The loss-recovery strategy contract (window deflation during recovery)
pub trait RecoveryOps {
    /// Invoked once when the engine enters the Recovery state
    fn enter_recovery(
        &mut self,
        window: &mut WindowState,
        dup_ack_count: u32,
        unacked_bytes: u32,
        delivered_bytes: u32,
    );

    /// Invoked for every ack processed while in Recovery
    fn do_recovery(&mut self, window: &mut WindowState, delivered_bytes: u32);

    /// Invoked when a cumulative ack covers the recovery point
    fn exit_recovery(&mut self, window: &mut WindowState);

    /// Reports bytes handed to the network while in Recovery
    fn update_bytes_sent(&mut self, _bytes: u32) {}

    /// Creates an independent instance with fresh state
    #[cfg(feature = "alloc")]
    fn fork(&self) -> Box<dyn RecoveryOps + Send>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;

    /// Classic slow start / halving behavior, sufficient to drive the
    /// engine's state machinery in tests. Not a shipped algorithm.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MockCongestion {
        pub ssthresh_calls: u32,
        pub acked_segments: u32,
        pub state_changes: u32,
        pub events: u32,
    }

    impl CongestionControl for MockCongestion {
        fn ssthresh(&mut self, window: &WindowState, bytes_in_flight: u32) -> u32 {
            self.ssthresh_calls += 1;
            //= https://www.rfc-editor.org/rfc/rfc5681#section-3.1
            //# ssthresh = max (FlightSize / 2, 2*SMSS)
            (bytes_in_flight / 2).max(2 * window.segment_size as u32)
        }

        fn increase_window(&mut self, window: &mut WindowState, segs_acked: u32) {
            if window.in_slow_start() {
                window.cwnd += window.segment_size as u32 * segs_acked;
            } else if window.cwnd > 0 {
                let mss = window.segment_size as u32;
                window.cwnd += (mss * mss / window.cwnd).max(1) * segs_acked;
            }
        }

        fn congestion_state_set(&mut self, _window: &mut WindowState, _state: CongestionState) {
            self.state_changes += 1;
        }

        fn cwnd_event(&mut self, _window: &mut WindowState, _event: CongestionEvent) {
            self.events += 1;
        }

        fn pkts_acked(&mut self, _window: &WindowState, segs_acked: u32, _rtt: Duration) {
            self.acked_segments += segs_acked;
        }

        fn fork(&self) -> Box<dyn CongestionControl + Send> {
            Box::new(Self::default())
        }
    }

    /// Classic fast-recovery window accounting: inflate by one segment
    /// per duplicate ack, deflate to ssthresh on exit.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MockRecovery {
        pub entered: u32,
        pub exited: u32,
        pub bytes_sent: u32,
    }

    impl RecoveryOps for MockRecovery {
        fn enter_recovery(
            &mut self,
            window: &mut WindowState,
            dup_ack_count: u32,
            _unacked_bytes: u32,
            _delivered_bytes: u32,
        ) {
            self.entered += 1;
            //= https://www.rfc-editor.org/rfc/rfc5681#section-3.2
            //# set cwnd to ssthresh plus 3*SMSS.  This artificially
            //# "inflates" the congestion window by the number of segments
            //# (three) that have left the network and which the receiver
            //# has buffered.
            window.cwnd = window.ssthresh + dup_ack_count * window.segment_size as u32;
        }

        fn do_recovery(&mut self, window: &mut WindowState, _delivered_bytes: u32) {
            //= https://www.rfc-editor.org/rfc/rfc5681#section-3.2
            //# For each additional duplicate ACK received (after the third),
            //# cwnd MUST be incremented by SMSS.
            window.cwnd += window.segment_size as u32;
        }

        fn exit_recovery(&mut self, window: &mut WindowState) {
            self.exited += 1;
            //= https://www.rfc-editor.org/rfc/rfc5681#section-3.2
            //# set cwnd to ssthresh (the value set in step 2).  This is
            //# termed "deflating" the window.
            window.cwnd = window.ssthresh;
            window.apply_cwnd_floor();
        }

        fn update_bytes_sent(&mut self, bytes: u32) {
            self.bytes_sent += bytes;
        }

        fn fork(&self) -> Box<dyn RecoveryOps + Send> {
            Box::new(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn congestion_state_transitions() {
        let mut state = CongestionState::Open;

        state.on_dup_ack().unwrap();
        assert!(state.is_disorder());

        state.enter_recovery().unwrap();
        assert!(state.is_recovery());

        state.exit_to_open().unwrap();
        assert!(state.is_open());

        // recovery cannot be entered from loss
        state.enter_loss().unwrap();
        assert!(state.enter_recovery().is_err());
        assert!(state.is_loss());

        state.exit_to_open().unwrap();
        assert!(state.is_open());
    }

    #[test]
    fn available_window() {
        let mut window = WindowState::new(1000, 10_000, u32::MAX);
        window.advertised_window = 5_000;
        window.bytes_in_flight = 3_000;

        assert_eq!(window.available_window(), 2_000);

        window.bytes_in_flight = 6_000;
        assert_eq!(window.available_window(), 0);

        window.advertised_window = 50_000;
        assert_eq!(window.available_window(), 4_000);
    }

    #[test]
    fn cwnd_floor() {
        let mut window = WindowState::new(1000, 10_000, u32::MAX);
        window.cwnd = 12;
        window.apply_cwnd_floor();
        assert_eq!(window.cwnd, 1000);
    }
}
