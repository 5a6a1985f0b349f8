// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection timers
//!
//! Each connection owns at most one armed instance of every timer. The
//! connection polls [`Timers::poll`] with the current time and dispatches
//! on the returned [`Expiration`]; nothing fires on its own.

use crate::config::Config;
use tern_tcp_core::{
    rtt::RttEstimator,
    time::{Duration, Timer, Timestamp},
};

/// Which timer fired
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiration {
    /// The retransmission timeout
    Rto,
    /// The zero-window probe timer
    Persist,
    /// The delayed-ack timer
    DelayedAck,
    /// The LAST_ACK bound on waiting for the final ack
    LastAck,
    /// The 2×MSL TIME_WAIT timer
    TimeWait,
}

#[derive(Debug, Default)]
pub struct Timers {
    rto: Timer,
    persist: Timer,
    delayed_ack: Timer,
    last_ack: Timer,
    time_wait: Timer,

    /// Number of unanswered retransmission timeouts; doubles the RTO
    backoff: u32,
    /// Consecutive retransmissions without a new cumulative ack
    pub retries: u32,
    /// Current persist probe interval; doubles per probe
    persist_interval: Option<Duration>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The retransmission timeout for the current backoff level
    ///
    //= https://www.rfc-editor.org/rfc/rfc6298#section-2.3
    //# RTO <- SRTT + max (G, K*RTTVAR)
    //# where K = 4.
    pub fn rto_duration(&self, estimator: &dyn RttEstimator, config: &Config) -> Duration {
        let variation = config.clock_granularity.max(4 * estimator.variation());
        let rto = (estimator.estimate() + variation).max(config.min_rto);

        //= https://www.rfc-editor.org/rfc/rfc6298#section-5.5
        //# The host MUST set RTO <- RTO * 2 ("back off the timer").
        let rto = rto.saturating_mul(2u32.saturating_pow(self.backoff));
        rto.min(config.max_rto)
    }

    /// (Re)arms the RTO at `now + rto_duration`
    pub fn arm_rto(&mut self, now: Timestamp, estimator: &dyn RttEstimator, config: &Config) {
        self.rto.set(now + self.rto_duration(estimator, config));
        // persist and the RTO are mutually exclusive
        self.persist.cancel();
        self.persist_interval = None;
    }

    /// Arms the RTO at an explicit duration, for SYN segments which use
    /// the configured initial RTO rather than the estimator
    pub fn arm_rto_at(&mut self, now: Timestamp, duration: Duration, config: &Config) {
        let duration = duration
            .saturating_mul(2u32.saturating_pow(self.backoff))
            .min(config.max_rto);
        self.rto.set(now + duration);
        self.persist.cancel();
        self.persist_interval = None;
    }

    pub fn cancel_rto(&mut self) {
        self.rto.cancel();
    }

    pub fn rto_is_armed(&self) -> bool {
        self.rto.is_armed()
    }

    /// Increments the backoff exponent after an RTO expiry
    pub fn on_rto_expired(&mut self) {
        self.backoff = self.backoff.saturating_add(1);
        self.retries = self.retries.saturating_add(1);
    }

    /// Resets backoff state after a new cumulative ack
    pub fn on_cumulative_ack(&mut self) {
        self.backoff = 0;
        self.retries = 0;
    }

    /// Arms the persist timer, cancelling the RTO (the two never coexist)
    ///
    //= https://www.rfc-editor.org/rfc/rfc9293#section-3.8.6.1
    //# The transmitting host SHOULD send the first zero-window probe when a
    //# zero window has existed for the retransmission timeout period
    pub fn arm_persist(&mut self, now: Timestamp, config: &Config) {
        let interval = self
            .persist_interval
            .map(|i| i.saturating_mul(2).min(config.max_rto))
            .unwrap_or(config.persist_interval);
        self.persist_interval = Some(interval);
        self.persist.set(now + interval);
        self.rto.cancel();
    }

    pub fn cancel_persist(&mut self) {
        self.persist.cancel();
        self.persist_interval = None;
    }

    pub fn persist_is_armed(&self) -> bool {
        self.persist.is_armed()
    }

    /// Arms the delayed-ack timer if it is not already pending
    pub fn arm_delayed_ack(&mut self, now: Timestamp, config: &Config) {
        if !self.delayed_ack.is_armed() {
            self.delayed_ack.set(now + config.delayed_ack_timeout);
        }
    }

    pub fn cancel_delayed_ack(&mut self) {
        self.delayed_ack.cancel();
    }

    pub fn delayed_ack_is_armed(&self) -> bool {
        self.delayed_ack.is_armed()
    }

    pub fn arm_last_ack(&mut self, now: Timestamp, config: &Config) {
        self.last_ack.set(now + config.last_ack_timeout);
    }

    pub fn arm_time_wait(&mut self, now: Timestamp, config: &Config) {
        self.time_wait.set(now + 2 * config.msl);
    }

    /// The earliest pending expiration across all timers
    pub fn next_expiration(&self) -> Option<Timestamp> {
        [
            &self.rto,
            &self.persist,
            &self.delayed_ack,
            &self.last_ack,
            &self.time_wait,
        ]
        .into_iter()
        .filter_map(|timer| timer.expiration())
        .min()
    }

    /// Takes the highest-priority expired timer, if any
    ///
    /// Callers loop until `None` so a single `on_timeout` drains every
    /// timer that came due.
    pub fn poll(&mut self, now: Timestamp) -> Option<Expiration> {
        if self.rto.poll_expiration(now).is_ready() {
            return Some(Expiration::Rto);
        }
        if self.persist.poll_expiration(now).is_ready() {
            return Some(Expiration::Persist);
        }
        if self.delayed_ack.poll_expiration(now).is_ready() {
            return Some(Expiration::DelayedAck);
        }
        if self.last_ack.poll_expiration(now).is_ready() {
            return Some(Expiration::LastAck);
        }
        if self.time_wait.poll_expiration(now).is_ready() {
            return Some(Expiration::TimeWait);
        }
        None
    }

    /// Cancels every timer; required on all teardown paths
    pub fn cancel_all(&mut self) {
        self.rto.cancel();
        self.persist.cancel();
        self.delayed_ack.cancel();
        self.last_ack.cancel();
        self.time_wait.cancel();
        self.persist_interval = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_tcp_core::rtt::MeanDeviation;
    use tern_tcp_core::time::{clock::testing as clock, Clock};

    fn estimator_with_sample(sample: Duration) -> MeanDeviation {
        let mut estimator = MeanDeviation::new();
        estimator.on_measurement(sample);
        estimator
    }

    #[test]
    fn rto_formula() {
        let config = Config::new();
        let timers = Timers::new();

        // srtt = 500ms, rttvar = 250ms => 500ms + 4*250ms = 1.5s
        let estimator = estimator_with_sample(Duration::from_millis(500));
        assert_eq!(
            timers.rto_duration(&estimator, &config),
            Duration::from_millis(1500)
        );

        // small samples are floored at min_rto
        let estimator = estimator_with_sample(Duration::from_millis(10));
        assert_eq!(timers.rto_duration(&estimator, &config), config.min_rto);
    }

    #[test]
    fn rto_backoff_doubles_and_caps() {
        let config = Config::new();
        let estimator = estimator_with_sample(Duration::from_millis(10));
        let mut timers = Timers::new();

        let base = timers.rto_duration(&estimator, &config);
        timers.on_rto_expired();
        assert_eq!(timers.rto_duration(&estimator, &config), base * 2);
        timers.on_rto_expired();
        assert_eq!(timers.rto_duration(&estimator, &config), base * 4);

        for _ in 0..10 {
            timers.on_rto_expired();
        }
        assert_eq!(timers.rto_duration(&estimator, &config), config.max_rto);

        timers.on_cumulative_ack();
        assert_eq!(timers.rto_duration(&estimator, &config), base);
    }

    /// The RTO stays within [min_rto, max_rto] for any sample and any
    /// backoff level
    #[test]
    #[cfg_attr(miri, ignore)]
    fn rto_bounds_check() {
        let config = Config::new();
        bolero::check!()
            .with_type::<(u32, u8)>()
            .for_each(|&(sample_ms, backoffs)| {
                let estimator = estimator_with_sample(Duration::from_millis(sample_ms as u64));
                let mut timers = Timers::new();
                for _ in 0..backoffs {
                    timers.on_rto_expired();
                }
                let rto = timers.rto_duration(&estimator, &config);
                assert!(rto >= config.min_rto);
                assert!(rto <= config.max_rto);
            });
    }

    #[test]
    fn persist_cancels_rto() {
        let config = Config::new();
        let estimator = estimator_with_sample(Duration::from_millis(100));
        let clock = clock::Clock::default();
        let mut timers = Timers::new();

        timers.arm_rto(clock.get_time(), &estimator, &config);
        assert!(timers.rto_is_armed());

        timers.arm_persist(clock.get_time(), &config);
        assert!(!timers.rto_is_armed());
        assert!(timers.persist_is_armed());

        // and arming the rto cancels persist
        timers.arm_rto(clock.get_time(), &estimator, &config);
        assert!(!timers.persist_is_armed());
    }

    #[test]
    fn persist_interval_grows() {
        let config = Config::new();
        let clock = clock::Clock::default();
        let mut timers = Timers::new();

        timers.arm_persist(clock.get_time(), &config);
        let first = timers.next_expiration().unwrap() - clock.get_time();
        assert_eq!(first, config.persist_interval);

        timers.arm_persist(clock.get_time(), &config);
        let second = timers.next_expiration().unwrap() - clock.get_time();
        assert_eq!(second, config.persist_interval * 2);

        for _ in 0..8 {
            timers.arm_persist(clock.get_time(), &config);
        }
        let capped = timers.next_expiration().unwrap() - clock.get_time();
        assert_eq!(capped, config.max_rto);
    }

    #[test]
    fn poll_order_and_drain() {
        let config = Config::new();
        let clock = clock::Clock::default();
        let mut timers = Timers::new();

        timers.arm_delayed_ack(clock.get_time(), &config);
        timers.arm_time_wait(clock.get_time(), &config);

        clock.inc_by(config.delayed_ack_timeout);
        assert_eq!(timers.poll(clock.get_time()), Some(Expiration::DelayedAck));
        assert_eq!(timers.poll(clock.get_time()), None);

        clock.inc_by(2 * config.msl);
        assert_eq!(timers.poll(clock.get_time()), Some(Expiration::TimeWait));
        assert_eq!(timers.poll(clock.get_time()), None);
    }

    #[test]
    fn cancel_all_clears_everything() {
        let config = Config::new();
        let clock = clock::Clock::default();
        let mut timers = Timers::new();

        timers.arm_persist(clock.get_time(), &config);
        timers.arm_delayed_ack(clock.get_time(), &config);
        timers.arm_last_ack(clock.get_time(), &config);
        timers.cancel_all();
        assert_eq!(timers.next_expiration(), None);
    }
}
