// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Acknowledgment processing: duplicate ack counting, recovery entry and
//! exit, partial acks, and RTT sampling

use super::Connection;
use tern_tcp_core::{
    congestion::{CongestionEvent, CongestionState},
    seq::SeqNumber,
    time::Timestamp,
    wire::{Flags, Header},
};

impl Connection {
    pub(super) fn process_ack(&mut self, header: &Header, has_payload: bool, now: Timestamp) {
        let ack = header.ack;
        let snd_una = self.tx.head_sequence();

        //= https://www.rfc-editor.org/rfc/rfc9293#section-3.10.7.4
        //# If the ACK acks something not yet sent (SEG.ACK > SND.NXT),
        //# then send an ACK, drop the segment, and return.
        if ack > self.seq.high_tx_mark {
            self.send_empty_packet(Flags::ACK, now);
            return;
        }

        // an old ack below the window carries no information
        if ack < snd_una {
            return;
        }

        let mut newly_sacked = false;
        if self.sack_enabled {
            if let Some(blocks) = header.sack_blocks() {
                newly_sacked = self.tx.update_sack(blocks);
            }
        }

        let old_advertised = self.window.advertised_window;
        self.update_peer_window(header);
        let window_changed = self.window.advertised_window != old_advertised;

        if ack == snd_una {
            //= https://www.rfc-editor.org/rfc/rfc5681#section-2
            //# DUPLICATE ACKNOWLEDGMENT: An acknowledgment is considered a
            //# "duplicate" [...] (a) the receiver of the ACK has outstanding data,
            //# (b) the incoming acknowledgment carries no data, (c) the SYN and
            //# FIN bits are both off, (d) the acknowledgment number is equal to
            //# the greatest acknowledgment received on the given connection [...]
            //# and (e) the advertised window in the incoming acknowledgment equals
            //# the advertised window in the last incoming acknowledgment.
            let is_duplicate = !has_payload
                && !window_changed
                && self.window.bytes_in_flight > 0
                && !header.flags.intersects(Flags::SYN | Flags::FIN);

            if is_duplicate || newly_sacked {
                self.on_duplicate_ack(now);
            }
        } else {
            self.on_cumulative_ack(ack, now);
        }

        // a closed peer window with data still queued switches to probing
        if self.window.advertised_window == 0 && self.tx.size() > 0 {
            if !self.timers.persist_is_armed() {
                self.timers.arm_persist(now, &self.config);
            }
        } else if self.timers.persist_is_armed() {
            self.timers.cancel_persist();
        }
    }

    fn on_duplicate_ack(&mut self, now: Timestamp) {
        self.dup_ack_count = (self.dup_ack_count + 1).min(self.config.dup_ack_threshold);

        match self.congestion_state {
            CongestionState::Open => {
                let previous = self.congestion_state;
                let _ = self.congestion_state.on_dup_ack();
                self.congestion_transition(previous);
                self.maybe_enter_recovery(now);
            }
            CongestionState::Disorder => self.maybe_enter_recovery(now),
            CongestionState::Recovery => {
                //= https://www.rfc-editor.org/rfc/rfc5681#section-3.2
                //# For each additional duplicate ACK received (after the third),
                //# cwnd MUST be incremented by SMSS.
                self.recovery.do_recovery(&mut self.window, 0);
            }
            CongestionState::Loss => {}
        }
    }

    fn maybe_enter_recovery(&mut self, now: Timestamp) {
        //= https://www.rfc-editor.org/rfc/rfc6582#section-3.2
        //# the Careful variant of impatient fast retransmit: the fast
        //# retransmit is only invoked when the cumulative ack covers the
        //# recovery point of the previous episode
        let threshold_met = self.dup_ack_count >= self.config.dup_ack_threshold
            && self.seq.high_rx_ack >= self.seq.recover;

        //= https://www.rfc-editor.org/rfc/rfc6675#section-5
        //# (1) If [...] IsLost (SND.UNA) returns true [...] the TCP MUST take
        //# the following actions
        let sack_loss = self.sack_enabled && self.tx.is_lost(self.tx.head_sequence());

        if !(threshold_met || sack_loss) {
            return;
        }
        let previous = self.congestion_state;
        if self.congestion_state.enter_recovery().is_err() {
            return;
        }
        self.congestion_transition(previous);

        if !self.sack_enabled {
            self.tx.mark_head_as_lost();
        }
        self.seq.set_recover();
        self.first_partial_ack = true;

        //= https://www.rfc-editor.org/rfc/rfc5681#section-3.2
        //# When the third duplicate ACK is received, a TCP MUST set ssthresh
        //# to no more than the value given in equation (4).
        let unacked = self.tx.size() as u32;
        self.window.ssthresh = self
            .congestion
            .ssthresh(&self.window, self.window.bytes_in_flight);
        let dup_acks = self.dup_ack_count;
        self.recovery
            .enter_recovery(&mut self.window, dup_acks, unacked, 0);
        self.window.apply_cwnd_floor();

        // fast retransmit
        let head = self.tx.head_sequence();
        self.send_data_packet(head, self.window.segment_size as usize, true, now);
    }

    fn on_cumulative_ack(&mut self, ack: SeqNumber, now: Timestamp) {
        self.seq.high_rx_ack = self.seq.high_rx_ack.max(ack);

        // the window reduced by a CWR has been fully acknowledged
        if self.ecn.cwr_acked(ack) {
            self.congestion
                .cwnd_event(&mut self.window, CongestionEvent::CompleteCwr);
        }

        let before = self.tx.size();
        self.tx.discard_up_to(ack, &mut |_delivered| {});
        let data_acked = before - self.tx.size();
        self.window.bytes_in_flight = self
            .window
            .bytes_in_flight
            .saturating_sub(data_acked as u32);

        // one sample per ack at most; retransmitted ranges are excluded
        if let Some(sample) = self.rtt_history.sample_for(ack, now) {
            self.rtt.on_measurement(sample);
            self.has_rtt_sample = true;
        }

        self.timers.on_cumulative_ack();

        let mss = self.window.segment_size as u32;
        let segs_acked = (data_acked as u32).div_ceil(mss.max(1));
        let mut restart_rto = true;

        match self.congestion_state {
            CongestionState::Recovery => {
                if ack >= self.seq.recover {
                    self.exit_recovery_episode(segs_acked);
                } else {
                    restart_rto = self.first_partial_ack;
                    self.on_partial_ack(now);
                }
            }
            CongestionState::Loss => {
                if ack >= self.seq.recover {
                    let previous = self.congestion_state;
                    let _ = self.congestion_state.exit_to_open();
                    self.congestion_transition(previous);
                    self.dup_ack_count = 0;
                }
                if segs_acked > 0 {
                    self.congestion.increase_window(&mut self.window, segs_acked);
                }
            }
            CongestionState::Disorder => {
                let previous = self.congestion_state;
                let _ = self.congestion_state.exit_to_open();
                self.congestion_transition(previous);
                self.dup_ack_count = 0;
                if segs_acked > 0 {
                    self.congestion.increase_window(&mut self.window, segs_acked);
                    self.congestion
                        .pkts_acked(&self.window, segs_acked, self.rtt.estimate());
                }
            }
            CongestionState::Open => {
                if segs_acked > 0 {
                    self.congestion.increase_window(&mut self.window, segs_acked);
                    self.congestion
                        .pkts_acked(&self.window, segs_acked, self.rtt.estimate());
                }
            }
        }

        // the RTO follows the oldest outstanding data
        let fin_outstanding = self.fin_seq.map_or(false, |fin| !(ack > fin));
        if self.window.bytes_in_flight == 0 && self.tx.size() == 0 && !fin_outstanding {
            self.timers.cancel_rto();
        } else if restart_rto {
            self.arm_rto(now);
        }
    }

    fn exit_recovery_episode(&mut self, segs_acked: u32) {
        //= https://www.rfc-editor.org/rfc/rfc6582#section-3.2
        //# Full acknowledgments: [...] exit the fast recovery procedure
        self.recovery.exit_recovery(&mut self.window);
        self.window.apply_cwnd_floor();
        let previous = self.congestion_state;
        let _ = self.congestion_state.exit_to_open();
        self.congestion_transition(previous);
        self.dup_ack_count = 0;
        if segs_acked > 0 {
            self.congestion
                .pkts_acked(&self.window, segs_acked, self.rtt.estimate());
        }
    }

    /// A cumulative ack that advances but does not reach the recovery
    /// point (RFC 6582 partial acknowledgments)
    fn on_partial_ack(&mut self, now: Timestamp) {
        //= https://www.rfc-editor.org/rfc/rfc6582#section-3.2
        //# Partial acknowledgments: [...] retransmit the first unacknowledged
        //# segment.
        if self.sack_enabled {
            self.tx.clear_head_retransmitted();
        } else {
            self.tx.mark_head_as_lost();
        }

        let head = self.tx.head_sequence();
        self.send_data_packet(head, self.window.segment_size as usize, true, now);

        // credit exactly one segment to the strategy
        self.congestion.pkts_acked(&self.window, 1, self.rtt.estimate());
        let mss = self.window.segment_size as u32;
        self.recovery.do_recovery(&mut self.window, mss);

        if self.first_partial_ack {
            //= https://www.rfc-editor.org/rfc/rfc6582#section-3.2
            //# Do this only for the first partial ACK that arrives during
            //# fast recovery.
            self.first_partial_ack = false;
        }
    }
}
