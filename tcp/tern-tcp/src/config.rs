// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;
use tern_tcp_core::seq::SeqNumber;

/// The error returned when a configuration value is out of range
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidationError(pub(crate) &'static str);

impl core::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ValidationError {}

/// ECN negotiation policy (RFC 3168 section 6.1.1)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EcnMode {
    /// Never request or accept ECN
    #[default]
    Off,
    /// Accept ECN if the peer requests it, never request it
    AcceptOnly,
    /// Request ECN on outgoing connections and accept it on incoming ones
    On,
}

/// Per-connection tunables
///
/// All durations are interpreted against the caller's clock. The defaults
/// follow the RFC recommendations where one exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    //= https://www.rfc-editor.org/rfc/rfc9293#section-3.7.1
    //# If an MSS Option is not received at connection setup, TCP
    //# implementations MUST assume a default send MSS of 536
    pub(crate) segment_size: u16,
    /// Initial congestion window in segments (RFC 6928)
    pub(crate) initial_cwnd_segments: u32,
    pub(crate) initial_ssthresh: u32,
    //= https://www.rfc-editor.org/rfc/rfc5681#section-3.2
    //# The fast retransmit algorithm uses the arrival
    //# of 3 duplicate ACKs (as defined in section 2, without
    //# any intervening ACKs which move SND.UNA) as an
    //# indication that a segment has been lost.
    pub(crate) dup_ack_threshold: u32,
    //= https://www.rfc-editor.org/rfc/rfc6298#section-2.4
    //# Whenever RTO is computed, if it is less than 1 second, then the
    //# RTO SHOULD be rounded up to 1 second.
    pub(crate) min_rto: Duration,
    //= https://www.rfc-editor.org/rfc/rfc6298#section-2.5
    //# A maximum value MAY be placed on RTO provided it is at least 60
    //# seconds.
    pub(crate) max_rto: Duration,
    pub(crate) clock_granularity: Duration,
    /// RTO used before any RTT sample exists, and for SYN segments
    pub(crate) initial_rto: Duration,
    pub(crate) syn_retries: u32,
    pub(crate) data_retries: u32,
    /// Initial zero-window probe interval; doubles up to `max_rto`
    pub(crate) persist_interval: Duration,
    pub(crate) delayed_ack_timeout: Duration,
    /// Full-sized segments received before an ack is forced
    pub(crate) delayed_ack_count: u32,
    /// TIME_WAIT lasts `2 * msl`
    pub(crate) msl: Duration,
    /// Bounds how long LAST_ACK waits for the final ack
    pub(crate) last_ack_timeout: Duration,
    /// Disables the Nagle algorithm when true
    pub(crate) no_delay: bool,
    pub(crate) sack: bool,
    pub(crate) timestamps: bool,
    pub(crate) window_scaling: bool,
    pub(crate) ecn: EcnMode,
    pub(crate) rx_buffer_size: u32,
    /// Fixed initial sequence number for deterministic tests; a real
    /// deployment leaves this unset and the connection derives one
    pub(crate) initial_sequence: Option<SeqNumber>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! setter {
    ($(#[doc = $doc:literal])* $name:ident, $field:ident, $inner:ty) => {
        $(#[doc = $doc])*
        pub fn $name(mut self, value: $inner) -> Result<Self, ValidationError> {
            self.$field = value;
            Ok(self)
        }
    };
}

impl Config {
    pub const fn new() -> Self {
        Self {
            segment_size: 536,
            initial_cwnd_segments: 10,
            initial_ssthresh: u32::MAX,
            dup_ack_threshold: 3,
            min_rto: Duration::from_secs(1),
            max_rto: Duration::from_secs(60),
            clock_granularity: Duration::from_millis(1),
            initial_rto: Duration::from_secs(3),
            syn_retries: 6,
            data_retries: 6,
            persist_interval: Duration::from_secs(6),
            delayed_ack_timeout: Duration::from_millis(200),
            delayed_ack_count: 2,
            msl: Duration::from_secs(120),
            last_ack_timeout: Duration::from_secs(3),
            no_delay: true,
            sack: true,
            timestamps: true,
            window_scaling: true,
            ecn: EcnMode::Off,
            rx_buffer_size: 65_535,
            initial_sequence: None,
        }
    }

    /// Sets the maximum segment size advertised to the peer
    pub fn with_segment_size(mut self, value: u16) -> Result<Self, ValidationError> {
        if value < 64 {
            return Err(ValidationError("segment size must be at least 64 bytes"));
        }
        self.segment_size = value;
        Ok(self)
    }

    /// Sets the duplicate ack threshold for fast retransmit
    pub fn with_dup_ack_threshold(mut self, value: u32) -> Result<Self, ValidationError> {
        if value == 0 {
            return Err(ValidationError("duplicate ack threshold must be non-zero"));
        }
        self.dup_ack_threshold = value;
        Ok(self)
    }

    /// Sets the receive buffer size, bounding the advertised window
    pub fn with_rx_buffer_size(mut self, value: u32) -> Result<Self, ValidationError> {
        if value == 0 {
            return Err(ValidationError("receive buffer must be non-empty"));
        }
        self.rx_buffer_size = value;
        Ok(self)
    }

    setter!(
        /// Sets the initial congestion window in segments
        with_initial_cwnd_segments,
        initial_cwnd_segments,
        u32
    );
    setter!(with_initial_ssthresh, initial_ssthresh, u32);
    setter!(with_min_rto, min_rto, Duration);
    setter!(with_max_rto, max_rto, Duration);
    setter!(with_initial_rto, initial_rto, Duration);
    setter!(with_syn_retries, syn_retries, u32);
    setter!(with_data_retries, data_retries, u32);
    setter!(with_persist_interval, persist_interval, Duration);
    setter!(with_delayed_ack_timeout, delayed_ack_timeout, Duration);
    setter!(with_delayed_ack_count, delayed_ack_count, u32);
    setter!(with_msl, msl, Duration);
    setter!(with_last_ack_timeout, last_ack_timeout, Duration);
    setter!(
        /// Disables the Nagle algorithm when true
        with_no_delay,
        no_delay,
        bool
    );
    setter!(with_sack, sack, bool);
    setter!(with_timestamps, timestamps, bool);
    setter!(with_window_scaling, window_scaling, bool);
    setter!(with_ecn, ecn, EcnMode);
    setter!(
        /// Pins the initial sequence number, for deterministic tests
        with_initial_sequence,
        initial_sequence,
        Option<SeqNumber>
    );

    pub fn segment_size(&self) -> u16 {
        self.segment_size
    }

    pub fn initial_cwnd(&self) -> u32 {
        self.initial_cwnd_segments * self.segment_size as u32
    }

    /// The shift count advertised in the window scale option, derived
    /// from the receive buffer size (RFC 7323 section 2.3)
    pub fn window_scale_shift(&self) -> u8 {
        let mut shift = 0u8;
        let mut max_window = u16::MAX as u32;
        while max_window < self.rx_buffer_size && shift < 14 {
            shift += 1;
            max_window <<= 1;
        }
        shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new();
        assert_eq!(config.segment_size, 536);
        assert_eq!(config.dup_ack_threshold, 3);
        assert_eq!(config.min_rto, Duration::from_secs(1));
        assert_eq!(config.msl, Duration::from_secs(120));
        assert_eq!(config.ecn, EcnMode::Off);
    }

    #[test]
    fn validation() {
        assert!(Config::new().with_segment_size(10).is_err());
        assert!(Config::new().with_dup_ack_threshold(0).is_err());
        assert!(Config::new().with_rx_buffer_size(0).is_err());

        let config = Config::new()
            .with_segment_size(1460)
            .unwrap()
            .with_no_delay(false)
            .unwrap();
        assert_eq!(config.segment_size(), 1460);
        assert!(!config.no_delay);
    }

    #[test]
    fn window_scale_shift() {
        assert_eq!(Config::new().window_scale_shift(), 0);

        let config = Config::new().with_rx_buffer_size(1 << 20).unwrap();
        assert_eq!(config.window_scale_shift(), 5);
    }
}
