// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Outbound segmentation: what to send next, and the packet builders

use super::{Connection, State, Transmission};
use bytes::Bytes;
use core::net::SocketAddr;
use smallvec::SmallVec;
use tern_tcp_core::{
    congestion::CongestionEvent,
    seq::SeqNumber,
    time::Timestamp,
    wire::{ExplicitCongestionNotification, Flags, Header, Segment, TcpOption},
};

impl Connection {
    /// Transmits as much queued data as the windows and the send rules
    /// allow; returns the number of segments handed to the network
    ///
    //= https://www.rfc-editor.org/rfc/rfc6675#section-5
    //# (C) If cwnd - pipe >= 1 SMSS, the sender SHOULD transmit one or more
    //# segments as follows: [...] (C.5) If cwnd - pipe >= 1 SMSS, return to
    //# (C.1)
    pub(super) fn send_pending_data(&mut self, now: Timestamp) -> usize {
        let mut sent = 0;

        loop {
            if !matches!(
                self.state,
                State::Established | State::CloseWait | State::FinWait1 | State::Closing
            ) {
                break;
            }

            let available = self.window.available_window() as usize;
            if available == 0 {
                break;
            }

            // the rescue retransmission is a SACK-only rule; without sack
            // information only the fast-retransmit and partial-ack paths
            // resend data during recovery
            let allow_rescue = self.congestion_state.is_recovery() && self.sack_enabled;
            let Some(seq) = self.tx.next_seg(allow_rescue) else {
                break;
            };

            let pending = self.tx.size_from_sequence(seq);
            if pending == 0 {
                break;
            }

            let mss = self.window.segment_size as usize;
            let to_send = pending.min(mss).min(available);

            if to_send < mss {
                if to_send < pending && self.window.bytes_in_flight > 0 {
                    // a window fragment with data outstanding; the acks for
                    // the flight will open the window
                    break;
                }
                //= https://www.rfc-editor.org/rfc/rfc9293#section-3.7.4
                //# If there is unacknowledged data [...] the sending TCP
                //# endpoint buffers all user data [...] until the outstanding
                //# data has been acknowledged
                if !self.config.no_delay
                    && self.window.bytes_in_flight > 0
                    && !self.close_on_empty
                {
                    break;
                }
            }

            if self.window.bytes_in_flight == 0 && seq == self.seq.next_tx {
                // first transmission after an idle flight
                self.congestion
                    .cwnd_event(&mut self.window, CongestionEvent::TxStart);
            }
            if self.send_data_packet(seq, to_send, true, now) == 0 {
                break;
            }
            sent += 1;
        }

        // the FIN follows the last queued byte out
        if self.close_on_empty && self.fin_seq.is_none() && !self.tx.has_unsent_data() {
            self.send_fin(now);
        }

        // a closed peer window with data waiting switches to probing
        if self.window.advertised_window == 0
            && self.tx.size() > 0
            && self.state.is_synchronized()
            && !self.timers.persist_is_armed()
        {
            self.timers.arm_persist(now, &self.config);
        }

        sent
    }

    /// Builds and queues one data segment starting at `seq`; returns the
    /// payload size
    pub(super) fn send_data_packet(
        &mut self,
        seq: SeqNumber,
        max: usize,
        with_ack: bool,
        now: Timestamp,
    ) -> usize {
        let is_retransmission = seq < self.seq.next_tx;

        let mut flags = if with_ack { Flags::ACK } else { Flags::NONE };

        //= https://www.rfc-editor.org/rfc/rfc3168#section-6.1.2
        //# the TCP sender [...] reduces its congestion window [...] at most
        //# once per window of data. [...] The sending TCP MUST NOT increase
        //# the congestion window in response to the receipt of an ECN-Echo
        //# ACK packet.
        if self
            .ecn
            .take_backoff(self.seq.next_tx, self.tx.head_sequence())
        {
            self.window.ssthresh = self
                .congestion
                .ssthresh(&self.window, self.window.bytes_in_flight);
            self.window.cwnd = self.window.ssthresh;
            self.window.apply_cwnd_floor();
            flags |= Flags::CWR;
        }

        let payload = self.tx.copy_from_sequence(seq, max);
        if payload.is_empty() {
            return 0;
        }
        let len = payload.len();

        if with_ack {
            flags |= self.ecn.ack_flags();
            self.segs_since_ack = 0;
            self.timers.cancel_delayed_ack();
        }

        let mut header = self.build_header(flags);
        header.seq = seq;
        if with_ack {
            header.ack = self.rx_ack_number();
        }
        self.add_options(&mut header, now);

        let end = seq + len;
        if end > self.seq.next_tx {
            // new data enters the flight
            let new_bytes = end - self.seq.next_tx;
            self.window.bytes_in_flight += new_bytes as u32;
            self.events.on_data_sent(new_bytes);
        } else if self.congestion_state.is_loss() {
            // the flight was reset when the timer fired
            self.window.bytes_in_flight += len as u32;
        }

        self.rtt_history.on_send(seq, len, now);
        self.seq.on_send(end);
        if self.congestion_state.is_recovery() {
            self.recovery.update_bytes_sent(len as u32);
        }

        let ecn = self.ecn.ecn_codepoint(true, is_retransmission);
        self.queue(header, payload, ecn);

        if !self.timers.rto_is_armed() {
            self.arm_rto(now);
        }
        len
    }

    /// Queues a segment with no payload (acks, window updates)
    pub(super) fn send_empty_packet(&mut self, flags: Flags, now: Timestamp) {
        let mut flags = flags;
        if flags.contains(Flags::ACK) {
            flags |= self.ecn.ack_flags();
            self.segs_since_ack = 0;
            self.timers.cancel_delayed_ack();
        }

        let mut header = self.build_header(flags);
        header.seq = self.seq.next_tx;
        if flags.contains(Flags::ACK) {
            header.ack = self.rx_ack_number();
        }
        self.add_options(&mut header, now);
        self.queue(header, Bytes::new(), ExplicitCongestionNotification::NotEct);
    }

    /// Sends a SYN or SYN/ACK carrying the handshake options
    pub(super) fn send_syn(&mut self, now: Timestamp, synack: bool) {
        let mut flags = Flags::SYN;
        if synack {
            flags |= Flags::ACK;
            if self.ecn.is_enabled() {
                flags |= Flags::ECE;
            }
        } else if self.ecn.request_on_syn() {
            //= https://www.rfc-editor.org/rfc/rfc3168#section-6.1.1
            //# the ECN-setup SYN packet, [...] with the ECE and CWR flags set
            flags |= Flags::ECE | Flags::CWR;
        }

        let isn = self.tx.head_sequence() - 1u32;
        let mut header = self.build_header(flags);
        header.seq = isn;
        if synack {
            header.ack = self.rx.next_rx_sequence();
        }

        let mut options: SmallVec<[TcpOption; 4]> = SmallVec::new();
        options.push(TcpOption::Mss(self.config.segment_size));
        if self.config.window_scaling && (!synack || self.window_scaling_enabled) {
            options.push(TcpOption::WindowScale(self.config.window_scale_shift()));
        }
        if self.config.sack && (!synack || self.sack_enabled) {
            options.push(TcpOption::SackPermitted);
        }
        if self.config.timestamps && (!synack || self.timestamps_enabled) {
            options.push(TcpOption::Timestamps {
                value: self.ts_value(now),
                echo: if synack { self.ts_recent } else { 0 },
            });
        }
        header.options = options;

        self.seq.on_send(isn + 1u32);
        self.queue(header, Bytes::new(), ExplicitCongestionNotification::NotEct);

        //= https://www.rfc-editor.org/rfc/rfc6298#section-2.1
        //# the sender SHOULD set RTO <- 1 second [...] for the SYN
        self.timers
            .arm_rto_at(now, self.config.initial_rto, &self.config);
    }

    /// Sends our FIN, advancing the lifecycle state; a no-op if one was
    /// already sent
    pub(super) fn send_fin(&mut self, now: Timestamp) {
        if self.fin_seq.is_some() {
            return;
        }
        if self.lifecycle(State::on_local_close).is_err() {
            return;
        }

        let seq = self.seq.next_tx;
        self.fin_seq = Some(seq);

        let mut header = self.build_header(Flags::FIN | Flags::ACK);
        header.seq = seq;
        header.ack = self.rx_ack_number();
        self.add_options(&mut header, now);
        self.segs_since_ack = 0;
        self.timers.cancel_delayed_ack();
        self.queue(header, Bytes::new(), ExplicitCongestionNotification::NotEct);

        self.seq.on_send(seq + 1u32);

        if matches!(self.state, State::LastAck) {
            self.timers.arm_last_ack(now, &self.config);
        }
        if !self.timers.rto_is_armed() {
            self.arm_rto(now);
        }
    }

    /// Retransmits a FIN that was never acknowledged
    pub(super) fn resend_fin(&mut self, now: Timestamp) {
        let Some(fin_seq) = self.fin_seq else {
            return;
        };
        let mut header = self.build_header(Flags::FIN | Flags::ACK);
        header.seq = fin_seq;
        header.ack = self.rx_ack_number();
        self.add_options(&mut header, now);
        self.queue(header, Bytes::new(), ExplicitCongestionNotification::NotEct);
    }

    /// A single-byte probe of a closed peer window
    ///
    //= https://www.rfc-editor.org/rfc/rfc9293#section-3.8.6.1
    //# The sending TCP peer must regularly transmit at least one octet of
    //# new data (if available)
    pub(super) fn send_window_probe(&mut self, now: Timestamp) {
        let seq = self.seq.next_tx;
        let payload = self.tx.copy_from_sequence(seq, 1);
        if payload.is_empty() {
            // nothing new to probe with; a bare ack keeps the peer honest
            self.send_empty_packet(Flags::ACK, now);
            return;
        }
        let len = payload.len();

        let mut header = self.build_header(Flags::ACK);
        header.seq = seq;
        header.ack = self.rx_ack_number();
        self.add_options(&mut header, now);

        self.seq.on_send(seq + len);
        self.window.bytes_in_flight += len as u32;
        self.rtt_history.on_send(seq, len, now);
        self.queue(header, payload, ExplicitCongestionNotification::NotEct);
    }

    /// A reset carrying `seq`, addressed to the connection's peer
    pub(super) fn send_rst_at(&mut self, seq: SeqNumber) {
        let mut header = self.build_header(Flags::RST);
        header.seq = seq;
        self.queue(header, Bytes::new(), ExplicitCongestionNotification::NotEct);
    }

    /// A reset in reply to `segment` from an unsynchronized state, per
    /// the RFC 9293 CLOSED-state rules
    pub(super) fn send_rst_for(&mut self, segment: &Segment, from: SocketAddr) {
        let header = &segment.header;
        let mut rst = Header::new(header.destination_port, header.source_port);
        if header.flags.contains(Flags::ACK) {
            //= https://www.rfc-editor.org/rfc/rfc9293#section-3.10.7.1
            //# If the ACK bit is on, <SEQ=SEG.ACK><CTL=RST>
            rst.flags = Flags::RST;
            rst.seq = header.ack;
        } else {
            //= https://www.rfc-editor.org/rfc/rfc9293#section-3.10.7.1
            //# If the ACK bit is off, sequence number zero is used,
            //# <SEQ=0><ACK=SEG.SEQ+SEG.LEN><CTL=RST,ACK>
            rst.flags = Flags::RST | Flags::ACK;
            rst.ack = segment.end_seq();
        }
        self.outbox.push_back(Transmission {
            segment: Segment::new(rst, Bytes::new()),
            ecn: ExplicitCongestionNotification::NotEct,
            to: from,
        });
    }

    fn build_header(&self, flags: Flags) -> Header {
        let (source, destination) = match (self.local_addr, self.peer_addr) {
            (Some(local), Some(peer)) => (local.port(), peer.port()),
            _ => (0, 0),
        };
        let mut header = Header::new(source, destination);
        header.flags = flags;
        header.window = self.window_field(flags);
        header
    }

    /// The window field value: scaled by our shift count, except on
    /// handshake segments which are never scaled
    fn window_field(&self, flags: Flags) -> u16 {
        let advertised = self.advertised_window();
        if flags.contains(Flags::SYN) {
            advertised.min(u16::MAX as u32) as u16
        } else {
            (advertised >> self.window.snd_wind_shift).min(u16::MAX as u32) as u16
        }
    }

    /// The options carried on every non-SYN segment: the timestamp (when
    /// negotiated) and the receiver's SACK blocks on acks
    fn add_options(&mut self, header: &mut Header, now: Timestamp) {
        if self.timestamps_enabled {
            let value = self.ts_value(now);
            header.options.push(TcpOption::Timestamps {
                value,
                echo: self.ts_recent,
            });
        }
        if self.sack_enabled && header.flags.contains(Flags::ACK) {
            let blocks = self.rx.sack_blocks();
            if !blocks.is_empty() {
                header.options.push(TcpOption::Sack(blocks));
            }
        }
    }

    fn queue(&mut self, header: Header, payload: Bytes, ecn: ExplicitCongestionNotification) {
        let Some(to) = self.peer_addr else {
            return;
        };
        self.outbox.push_back(Transmission {
            segment: Segment::new(header, payload),
            ecn,
            to,
        });
    }
}
