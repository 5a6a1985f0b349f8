// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Inbound segment dispatch and per-state processing

use super::{Connection, State};
use crate::error::Error;
use core::net::SocketAddr;
use tern_tcp_core::{
    congestion::CongestionEvent,
    time::Timestamp,
    wire::{ExplicitCongestionNotification, Flags, Header, Segment},
};

impl Connection {
    /// Processes one segment delivered by the network
    pub fn on_segment(
        &mut self,
        segment: Segment,
        ecn: ExplicitCongestionNotification,
        from: SocketAddr,
        now: Timestamp,
    ) {
        if self.state.is_closed() {
            //= https://www.rfc-editor.org/rfc/rfc9293#section-3.10.7.1
            //# If the state is CLOSED (i.e., TCB does not exist), then
            //# all data in the incoming segment is discarded. [...] An incoming
            //# segment not containing a RST causes a RST to be sent in response.
            if !segment.header.flags.contains(Flags::RST) {
                self.send_rst_for(&segment, from);
            }
            return;
        }

        // IP-layer congestion marking
        if ecn.congestion_experienced() {
            if self.ecn.on_ce_received() {
                self.congestion
                    .cwnd_event(&mut self.window, CongestionEvent::EcnIsCe);
            }
        } else if self.ecn.is_enabled() {
            self.congestion
                .cwnd_event(&mut self.window, CongestionEvent::EcnNoCe);
        }

        match self.state {
            State::Listen => self.process_listen(segment, from, now),
            State::SynSent => self.process_syn_sent(segment, now),
            State::SynRcvd => self.process_syn_rcvd(segment, now),
            State::Established => self.process_established(segment, now),
            State::FinWait1 | State::FinWait2 | State::CloseWait => {
                self.process_wait(segment, now)
            }
            State::Closing => self.process_closing(segment, now),
            State::LastAck => self.process_last_ack(segment, now),
            State::TimeWait => self.process_time_wait(segment, now),
            State::Closed => {}
        }
    }

    fn process_listen(&mut self, segment: Segment, from: SocketAddr, now: Timestamp) {
        let flags = segment.header.flags;
        //= https://www.rfc-editor.org/rfc/rfc9293#section-3.10.7.2
        //# First, check for a RST: An incoming RST segment could not be
        //# valid since it could not have been sent in response to anything
        //# sent by this incarnation of the connection.  An incoming RST
        //# should be ignored.
        if flags.contains(Flags::RST) {
            return;
        }
        //= https://www.rfc-editor.org/rfc/rfc9293#section-3.10.7.2
        //# Any acknowledgment is bad if it arrives on a connection still in
        //# the LISTEN state.  An acceptable reset segment should be formed
        if flags.contains(Flags::ACK) {
            self.send_rst_for(&segment, from);
            return;
        }
        if !flags.contains(Flags::SYN) {
            return;
        }

        let Some(factory) = self.child_factory.as_mut() else {
            return;
        };
        let resources = factory();
        let mut child = self.spawn_from_listener(resources, from);
        child.on_syn(&segment.header, now);
        self.events.on_incoming_connection(from);
        self.ready.push_back(child);
    }

    /// Accepts an initial SYN on a connection spawned from a listener
    fn on_syn(&mut self, header: &Header, now: Timestamp) {
        let _ = self.lifecycle(State::on_passive_syn);
        self.negotiate_from_syn(header);
        self.ecn.negotiate_passive(header.flags);

        let irs = header.seq;
        self.rx.set_next_rx_sequence(irs + 1u32);
        self.seq.high_rx = irs + 1u32;
        self.update_peer_window(header);

        let isn = self.derive_isn();
        self.seq.next_tx = isn;
        self.seq.high_tx_mark = isn;
        self.seq.recover = isn;
        self.seq.high_rx_ack = isn;
        self.tx.set_head_sequence(isn + 1u32);

        self.send_syn(now, true);
    }

    fn process_syn_sent(&mut self, segment: Segment, now: Timestamp) {
        let header = segment.header.clone();
        let flags = header.flags;

        //= https://www.rfc-editor.org/rfc/rfc9293#section-3.10.7.3
        //# If the ACK acknowledges something not yet sent (the segment carries
        //# an unacceptable ACK) [...] send a reset
        if flags.contains(Flags::ACK) && header.ack != self.seq.next_tx {
            if !flags.contains(Flags::RST) {
                self.send_rst_at(header.ack);
            }
            return;
        }

        if flags.contains(Flags::RST) {
            if flags.contains(Flags::ACK) {
                // connection refused
                let _ = self.lifecycle(State::on_abort);
                self.timers.cancel_all();
                self.events.on_connection_failed(Error::Reset);
            }
            return;
        }

        if !flags.contains(Flags::SYN) {
            return;
        }

        self.negotiate_from_syn(&header);
        let irs = header.seq;
        self.rx.set_next_rx_sequence(irs + 1u32);
        self.seq.high_rx = irs + 1u32;
        self.update_peer_window(&header);

        if flags.contains(Flags::ACK) {
            // SYN/ACK completes our side of the handshake
            self.ecn.negotiate_active(flags);
            self.seq.high_rx_ack = header.ack;
            let _ = self.lifecycle(State::on_handshake_complete);
            self.timers.cancel_rto();
            self.timers.on_cumulative_ack();
            self.events.on_connection_succeeded();
            self.send_empty_packet(Flags::ACK, now);
            self.send_pending_data(now);
        } else {
            //= https://www.rfc-editor.org/rfc/rfc9293#section-3.10.7.3
            //# If the SYN bit is on [...] enter SYN-RECEIVED, form a SYN,ACK
            //# segment and send it
            let _ = self.lifecycle(State::on_simultaneous_syn);
            self.ecn.negotiate_passive(flags);
            self.send_syn(now, true);
        }
    }

    fn process_syn_rcvd(&mut self, segment: Segment, now: Timestamp) {
        let flags = segment.header.flags;

        if flags.contains(Flags::RST) {
            let _ = self.lifecycle(State::on_abort);
            self.teardown_error(Error::Reset);
            return;
        }
        if flags.contains(Flags::SYN) && !flags.contains(Flags::ACK) {
            // the SYN/ACK was lost; repeat it
            self.send_syn(now, true);
            return;
        }
        if !flags.contains(Flags::ACK) {
            return;
        }
        if segment.header.ack != self.seq.next_tx {
            self.send_rst_at(segment.header.ack);
            return;
        }

        let _ = self.lifecycle(State::on_handshake_complete);
        self.timers.cancel_rto();
        self.timers.on_cumulative_ack();
        self.seq.high_rx_ack = segment.header.ack;
        self.update_peer_window(&segment.header);
        if self.timestamps_enabled {
            if let Some((value, _)) = segment.header.timestamps() {
                self.ts_recent = value;
            }
        }
        self.events.on_connection_succeeded();

        // the handshake-completing ack may carry data or a FIN
        if !segment.payload.is_empty() || flags.contains(Flags::FIN) {
            self.process_established(segment, now);
        } else if self.close_on_empty {
            // close() raced the handshake
            self.send_pending_data(now);
        }
    }

    fn process_established(&mut self, segment: Segment, now: Timestamp) {
        let Some(segment) = self.precheck(segment, now) else {
            return;
        };
        if segment.header.flags.contains(Flags::ACK) {
            self.process_ack(&segment.header, !segment.payload.is_empty(), now);
        }
        self.receive_data(&segment, now);
        self.send_pending_data(now);
    }

    fn process_wait(&mut self, segment: Segment, now: Timestamp) {
        let Some(segment) = self.precheck(segment, now) else {
            return;
        };
        let header = segment.header.clone();

        if header.flags.contains(Flags::ACK) {
            self.process_ack(&header, !segment.payload.is_empty(), now);

            if matches!(self.state, State::FinWait1) {
                if let Some(fin_seq) = self.fin_seq {
                    if header.ack > fin_seq {
                        let _ = self.lifecycle(State::on_fin_acked);
                        if self.window.bytes_in_flight == 0 {
                            self.timers.cancel_rto();
                        }
                    }
                }
            }
        }

        self.receive_data(&segment, now);
        self.send_pending_data(now);
    }

    fn process_closing(&mut self, segment: Segment, now: Timestamp) {
        let Some(segment) = self.precheck(segment, now) else {
            return;
        };
        let header = &segment.header;

        if header.flags.contains(Flags::ACK) {
            if let Some(fin_seq) = self.fin_seq {
                if header.ack > fin_seq {
                    let _ = self.lifecycle(State::on_fin_acked);
                    self.timers.cancel_all();
                    self.timers.arm_time_wait(now, &self.config);
                }
            }
        }
    }

    fn process_last_ack(&mut self, segment: Segment, now: Timestamp) {
        let Some(segment) = self.precheck(segment, now) else {
            return;
        };
        let header = &segment.header;

        if header.flags.contains(Flags::ACK) {
            if let Some(fin_seq) = self.fin_seq {
                if header.ack > fin_seq {
                    let _ = self.lifecycle(State::on_fin_acked);
                    self.teardown_normal();
                }
            }
        }
    }

    fn process_time_wait(&mut self, segment: Segment, now: Timestamp) {
        let flags = segment.header.flags;
        if flags.contains(Flags::RST) {
            return;
        }
        //= https://www.rfc-editor.org/rfc/rfc9293#section-3.10.7.4
        //# If [...] a retransmission of the remote FIN [is received], [...]
        //# acknowledge it, and restart the 2 MSL timeout.
        if flags.contains(Flags::FIN) {
            self.send_empty_packet(Flags::ACK, now);
            self.timers.arm_time_wait(now, &self.config);
        }
    }

    /// Checks shared by every synchronized state: RST teardown, stray
    /// SYNs, the RFC 7323 timestamp requirement, and the acceptance
    /// window. Returns the segment when processing should continue.
    fn precheck(&mut self, segment: Segment, now: Timestamp) -> Option<Segment> {
        let flags = segment.header.flags;

        if flags.contains(Flags::RST) {
            if segment.header.seq == self.rx_ack_number() {
                //= https://www.rfc-editor.org/rfc/rfc9293#section-3.10.7.4
                //# If the RST bit is set, then any outstanding RECEIVEs and
                //# SEND should receive "reset" responses [...] enter the
                //# CLOSED state
                let _ = self.lifecycle(State::on_abort);
                self.teardown_error(Error::Reset);
            }
            return None;
        }

        if flags.contains(Flags::SYN) {
            // a SYN in the window on a synchronized connection is fatal
            self.send_rst_at(self.seq.next_tx);
            let _ = self.lifecycle(State::on_abort);
            self.teardown_error(Error::Reset);
            return None;
        }

        //= https://www.rfc-editor.org/rfc/rfc7323#section-3.2
        //# Once TSopt has been successfully negotiated [...] the TSopt MUST
        //# be sent in every non-<RST> segment
        if self.timestamps_enabled && segment.header.timestamps().is_none() {
            return None;
        }

        if !self.acceptable(&segment) {
            //= https://www.rfc-editor.org/rfc/rfc9293#section-3.10.7.4
            //# If an incoming segment is not acceptable, an acknowledgment
            //# should be sent in reply
            self.send_empty_packet(Flags::ACK, now);
            return None;
        }

        if self.timestamps_enabled {
            if let Some((value, _)) = segment.header.timestamps() {
                if segment.header.seq <= self.rx_ack_number() {
                    self.ts_recent = value;
                }
            }
        }

        // peer congestion echo / response flags
        if flags.contains(Flags::ECE) {
            self.ecn.on_peer_ece();
        }
        if flags.contains(Flags::CWR) {
            self.ecn.on_peer_cwr();
        }

        Some(segment)
    }

    /// The RFC 9293 sequence acceptance test, with strict equality in the
    /// states where only the final ack is expected
    fn acceptable(&self, segment: &Segment) -> bool {
        // after the peer's FIN was consumed the next expected sequence
        // includes the FIN octet
        let rcv_nxt = self.rx_ack_number();
        let seq = segment.header.seq;

        if matches!(
            self.state,
            State::LastAck | State::Closing | State::CloseWait
        ) {
            return seq == rcv_nxt;
        }

        let window = self.advertised_window() as usize;
        let window_end = rcv_nxt + window;
        let seg_end = segment.end_seq();

        if seq == seg_end {
            // a zero-length segment
            if window == 0 {
                seq == rcv_nxt
            } else {
                rcv_nxt <= seq && seq < window_end
            }
        } else if window == 0 {
            false
        } else {
            (rcv_nxt <= seq && seq < window_end)
                || (rcv_nxt < seg_end && seg_end <= window_end)
        }
    }

    /// Stores payload, advances the receive sequence, decides between an
    /// immediate and a delayed ack, and handles an in-order FIN
    fn receive_data(&mut self, segment: &Segment, now: Timestamp) {
        let header = &segment.header;
        let mut ack_now = false;
        let mut data_arrived = false;

        if !segment.payload.is_empty() {
            if !self.state.may_receive_data() || self.recv_shutdown {
                // late data is discarded but still acknowledged
                ack_now = true;
            } else {
                let had_gap = self.rx.has_out_of_order();
                let before = self.rx.next_rx_sequence();
                let stored = self.rx.add(header.seq, segment.payload.clone());
                let after = self.rx.next_rx_sequence();
                self.seq.high_rx = self.seq.high_rx.max(after);

                if after > before {
                    data_arrived = true;
                    self.events.on_data_received();
                }

                //= https://www.rfc-editor.org/rfc/rfc5681#section-4.2
                //# a TCP receiver SHOULD send an immediate duplicate ACK when an out-
                //# of-order segment arrives.  [...] a TCP receiver SHOULD send an
                //# immediate ACK when the incoming segment fills in all or part of a
                //# gap in the sequence space.
                if !stored || header.seq != before || had_gap || self.rx.has_out_of_order() {
                    ack_now = true;
                } else {
                    self.segs_since_ack += 1;
                    if self.segs_since_ack >= self.config.delayed_ack_count {
                        ack_now = true;
                    }
                }
            }
        }

        if header.flags.contains(Flags::FIN) {
            let fin_seq = header.seq + segment.payload.len();
            self.rx.set_fin_sequence(fin_seq);
            if self.rx.finished() {
                self.handle_peer_fin(now);
            }
            ack_now = true;
        }

        if ack_now {
            self.congestion
                .cwnd_event(&mut self.window, CongestionEvent::NonDelayedAck);
            self.send_empty_packet(Flags::ACK, now);
        } else if data_arrived {
            self.congestion
                .cwnd_event(&mut self.window, CongestionEvent::DelayedAck);
            self.timers.arm_delayed_ack(now, &self.config);
        }
    }

    fn handle_peer_fin(&mut self, now: Timestamp) {
        // pin the window we advertise for the remainder of the close, so
        // the final exchanges all carry the same value
        if self.frozen_advertised_window.is_none() {
            self.frozen_advertised_window = Some(self.advertised_window());
        }

        if self.lifecycle(State::on_peer_fin).is_err() {
            return;
        }

        match self.state {
            State::TimeWait => {
                // both FINs are accounted for; start the quiet period
                self.timers.cancel_all();
                self.timers.arm_time_wait(now, &self.config);
            }
            State::CloseWait => {
                self.events.on_data_received();
            }
            _ => {}
        }
    }

    /// Applies the SYN-only options: MSS, window scaling, SACK permitted,
    /// and the timestamp enable
    fn negotiate_from_syn(&mut self, header: &Header) {
        //= https://www.rfc-editor.org/rfc/rfc9293#section-3.7.1
        //# The MSS value to be sent in an MSS Option must be less than or equal
        //# to: MMS_R - 20
        if let Some(mss) = header.mss() {
            self.window.segment_size = self.config.segment_size.min(mss);
        }

        //= https://www.rfc-editor.org/rfc/rfc2018#section-2
        //# This option MAY be sent in a SYN segment by a TCP that has been
        //# extended to receive [...] the SACK option
        self.sack_enabled = self.config.sack && header.sack_permitted();

        //= https://www.rfc-editor.org/rfc/rfc7323#section-2.2
        //# This option is an offer, not a promise; both sides must send
        //# Window Scale options in their SYN segments to enable window
        //# scaling in either direction.
        if self.config.window_scaling {
            if let Some(shift) = header.window_scale() {
                self.window_scaling_enabled = true;
                self.window.rcv_wind_shift = shift.min(14);
                self.window.snd_wind_shift = self.config.window_scale_shift();
            }
        }

        self.timestamps_enabled = self.config.timestamps && header.timestamps().is_some();
        if self.timestamps_enabled {
            if let Some((value, _)) = header.timestamps() {
                self.ts_recent = value;
            }
        }
    }

    /// Applies the peer's advertised window, scaled unless the segment
    /// is part of the handshake
    pub(super) fn update_peer_window(&mut self, header: &Header) {
        //= https://www.rfc-editor.org/rfc/rfc7323#section-2.2
        //# The window field in a segment where the SYN bit is set (i.e., a
        //# <SYN> or <SYN,ACK>) MUST NOT be scaled.
        let shift = if header.flags.contains(Flags::SYN) {
            0
        } else {
            self.window.rcv_wind_shift
        };
        self.window.advertised_window = (header.window as u32) << shift;
    }
}
