// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A single TCP connection
//!
//! The connection is a passive state machine: the caller feeds it
//! inbound segments (`on_segment`), the current time (`on_timeout`,
//! and a `now` argument on every operation that can transmit), and
//! drains outbound segments with `poll_transmit`. Nothing happens
//! between calls; `next_timeout` tells the caller when to come back.

mod ack;
mod segment;
mod send;

pub use tern_tcp_core::lifecycle::State;

use crate::{
    config::Config,
    ecn::EcnController,
    endpoint::Endpoint,
    error::Error,
    timers::{Expiration, Timers},
    tracking::{RttHistory, SequenceSpace},
};
use bytes::Bytes;
use core::net::SocketAddr;
use std::collections::VecDeque;
use tern_tcp_core::{
    buffer::{RxBuffer, TxBuffer},
    congestion::{CongestionControl, CongestionState, RecoveryOps, WindowState},
    event::ConnectionEvents,
    rtt::RttEstimator,
    seq::SeqNumber,
    state,
    time::Timestamp,
    wire::{ExplicitCongestionNotification, Flags, Segment},
};

/// The pluggable pieces a connection is built from
pub struct Collaborators {
    pub tx: Box<dyn TxBuffer>,
    pub rx: Box<dyn RxBuffer>,
    pub rtt: Box<dyn RttEstimator + Send>,
    pub congestion: Box<dyn CongestionControl + Send>,
    pub recovery: Box<dyn RecoveryOps + Send>,
    pub events: Box<dyn ConnectionEvents>,
}

/// Fresh buffers and an observer for a connection spawned by a listener;
/// the estimator and congestion strategies are forked from the listener
pub struct ChildResources {
    pub tx: Box<dyn TxBuffer>,
    pub rx: Box<dyn RxBuffer>,
    pub events: Box<dyn ConnectionEvents>,
}

/// Produces resources for each accepted connection
pub type ChildFactory = Box<dyn FnMut() -> ChildResources>;

/// An outbound segment with its IP-layer ECN codepoint and destination
#[derive(Debug)]
pub struct Transmission {
    pub segment: Segment,
    pub ecn: ExplicitCongestionNotification,
    pub to: SocketAddr,
}

pub struct Connection {
    config: Config,
    state: State,
    congestion_state: CongestionState,

    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,

    seq: SequenceSpace,
    window: WindowState,
    dup_ack_count: u32,
    /// True until the first partial ack of the current recovery episode
    /// has restarted the RTO
    first_partial_ack: bool,

    tx: Box<dyn TxBuffer>,
    rx: Box<dyn RxBuffer>,
    rtt: Box<dyn RttEstimator + Send>,
    congestion: Box<dyn CongestionControl + Send>,
    recovery: Box<dyn RecoveryOps + Send>,
    events: Box<dyn ConnectionEvents>,

    rtt_history: RttHistory,
    has_rtt_sample: bool,
    timers: Timers,
    ecn: EcnController,
    outbox: VecDeque<Transmission>,
    ready: VecDeque<Connection>,
    child_factory: Option<ChildFactory>,

    // negotiated at handshake
    sack_enabled: bool,
    timestamps_enabled: bool,
    window_scaling_enabled: bool,
    /// The most recent in-window timestamp value from the peer, echoed
    /// on outgoing segments (RFC 7323 TS.Recent)
    ts_recent: u32,
    ts_epoch: Option<Timestamp>,

    /// Advertised window pinned when the peer's FIN arrives, so the
    /// window does not appear to move during the close sequence
    frozen_advertised_window: Option<u32>,
    /// Send a FIN as soon as the send buffer drains
    close_on_empty: bool,
    /// Sequence number consumed by our FIN, once sent
    fin_seq: Option<SeqNumber>,
    send_shutdown: bool,
    recv_shutdown: bool,
    /// Full segments received since the last ack we sent
    segs_since_ack: u32,
}

impl Connection {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let Collaborators {
            tx,
            rx,
            rtt,
            congestion,
            recovery,
            events,
        } = collaborators;

        Self {
            state: State::default(),
            congestion_state: CongestionState::default(),
            local_addr: None,
            peer_addr: None,
            seq: SequenceSpace::new(SeqNumber::default()),
            window: WindowState::new(
                config.segment_size,
                config.initial_cwnd(),
                config.initial_ssthresh,
            ),
            dup_ack_count: 0,
            first_partial_ack: true,
            tx,
            rx,
            rtt,
            congestion,
            recovery,
            events,
            rtt_history: RttHistory::new(),
            has_rtt_sample: false,
            timers: Timers::new(),
            ecn: EcnController::new(config.ecn),
            outbox: VecDeque::new(),
            ready: VecDeque::new(),
            child_factory: None,
            sack_enabled: false,
            timestamps_enabled: false,
            window_scaling_enabled: false,
            ts_recent: 0,
            ts_epoch: None,
            frozen_advertised_window: None,
            close_on_empty: false,
            fin_seq: None,
            send_shutdown: false,
            recv_shutdown: false,
            segs_since_ack: 0,
            config,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn congestion_state(&self) -> CongestionState {
        self.congestion_state
    }

    pub fn window(&self) -> &WindowState {
        &self.window
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_sack_enabled(&self) -> bool {
        self.sack_enabled
    }

    pub fn dup_ack_count(&self) -> u32 {
        self.dup_ack_count
    }

    /// Reserves an explicit local address before `connect` or `listen`
    pub fn bind(&mut self, endpoint: &mut Endpoint, addr: SocketAddr) -> Result<(), Error> {
        if !self.state.is_closed() {
            return Err(Error::InvalidState);
        }
        endpoint.bind(addr)?;
        self.local_addr = Some(addr);
        Ok(())
    }

    /// An active open: sends a SYN and moves to SYN_SENT
    pub fn connect(
        &mut self,
        endpoint: &mut Endpoint,
        peer: SocketAddr,
        now: Timestamp,
    ) -> Result<(), Error> {
        if self.lifecycle(State::on_connect).is_err() {
            //= https://www.rfc-editor.org/rfc/rfc9293#section-3.10.1
            //# If the connection is already in a state where an active
            //# open does not apply, a reset is in order
            self.send_rst_at(self.seq.next_tx);
            self.events.on_error_close(Error::InvalidState);
            return Err(Error::InvalidState);
        }

        if self.local_addr.is_none() {
            match endpoint.allocate_ephemeral(Endpoint::localhost()) {
                Ok(addr) => self.local_addr = Some(addr),
                Err(err) => {
                    let _ = self.lifecycle(State::on_abort);
                    return Err(err);
                }
            }
        }
        self.peer_addr = Some(peer);

        let isn = self.derive_isn();
        self.seq = SequenceSpace::new(isn);
        self.tx.set_head_sequence(isn + 1u32);
        self.send_syn(now, false);
        Ok(())
    }

    /// A passive open; `factory` supplies the buffers and observer for
    /// each spawned connection
    pub fn listen(&mut self, factory: ChildFactory) -> Result<(), Error> {
        self.lifecycle(State::on_listen)?;
        self.child_factory = Some(factory);
        Ok(())
    }

    /// Takes the next connection spawned by an incoming SYN
    pub fn accept(&mut self) -> Option<Connection> {
        self.ready.pop_front()
    }

    /// A fully independent connection sharing only the listener's
    /// configuration; the strategies are forked with fresh state
    pub fn spawn_from_listener(&mut self, resources: ChildResources, peer: SocketAddr) -> Self {
        let mut child = Self::new(
            self.config,
            Collaborators {
                tx: resources.tx,
                rx: resources.rx,
                rtt: self.rtt.fork(),
                congestion: self.congestion.fork(),
                recovery: self.recovery.fork(),
                events: resources.events,
            },
        );
        child.local_addr = self.local_addr;
        child.peer_addr = Some(peer);
        let _ = child.lifecycle(State::on_listen);
        child
    }

    /// Queues application data, transmitting whatever the windows allow
    pub fn send(&mut self, data: Bytes, now: Timestamp) -> Result<usize, Error> {
        if self.send_shutdown || self.close_on_empty {
            return Err(Error::Shutdown);
        }
        match self.state {
            State::SynSent | State::SynRcvd | State::Established | State::CloseWait => {}
            _ => return Err(Error::NotConnected),
        }

        let accepted = self.tx.enqueue(data)?;
        self.send_pending_data(now);
        Ok(accepted)
    }

    /// Removes up to `max` in-order received bytes
    pub fn recv(&mut self, max: usize) -> Result<Bytes, Error> {
        if !self.state.is_synchronized() {
            return Err(Error::NotConnected);
        }
        if self.recv_shutdown {
            return Ok(Bytes::new());
        }
        Ok(self.rx.extract(max))
    }

    /// A full close: no more sends or receives; a FIN follows the last
    /// queued byte. Calling close again is a no-op.
    pub fn close(&mut self, now: Timestamp) -> Result<(), Error> {
        self.recv_shutdown = true;
        self.shutdown_send(now)
    }

    /// Half-close of the send direction
    pub fn shutdown_send(&mut self, now: Timestamp) -> Result<(), Error> {
        match self.state {
            State::Closed => Ok(()),
            State::Listen | State::SynSent => {
                let _ = self.lifecycle(State::on_abort);
                self.timers.cancel_all();
                Ok(())
            }
            State::SynRcvd | State::Established | State::CloseWait => {
                if self.close_on_empty {
                    // a FIN for this close is already pending or sent
                    return Ok(());
                }
                self.send_shutdown = true;
                self.close_on_empty = true;
                if !self.tx.has_unsent_data() {
                    self.send_fin(now);
                }
                Ok(())
            }
            // the close sequence is already in progress
            _ => Ok(()),
        }
    }

    /// Half-close of the receive direction; further data from the peer
    /// is discarded but still acknowledged
    pub fn shutdown_recv(&mut self) -> Result<(), Error> {
        self.recv_shutdown = true;
        Ok(())
    }

    /// The earliest time at which `on_timeout` must be called
    pub fn next_timeout(&self) -> Option<Timestamp> {
        self.timers.next_expiration()
    }

    /// Drains every timer that came due and performs its work
    pub fn on_timeout(&mut self, now: Timestamp) {
        while let Some(expiration) = self.timers.poll(now) {
            match expiration {
                Expiration::Rto => self.on_rto(now),
                Expiration::Persist => self.on_persist(now),
                Expiration::DelayedAck => {
                    self.send_empty_packet(Flags::ACK, now);
                }
                Expiration::LastAck => {
                    // the final ack never arrived; stop waiting
                    let _ = self.lifecycle(State::on_abort);
                    self.teardown_normal();
                }
                Expiration::TimeWait => {
                    let _ = self.lifecycle(State::on_time_wait_expired);
                    self.teardown_normal();
                }
            }
        }
    }

    /// Takes the next outbound segment for the wire codec / IP layer
    pub fn poll_transmit(&mut self) -> Option<Transmission> {
        self.outbox.pop_front()
    }

    fn on_rto(&mut self, now: Timestamp) {
        match self.state {
            State::SynSent | State::SynRcvd => {
                //= https://www.rfc-editor.org/rfc/rfc6298#section-5.7
                //# If the timer expires awaiting the ACK of a SYN segment [...]
                //# the implementation MAY continue to use the backed off RTO value
                if self.timers.retries >= self.config.syn_retries {
                    let _ = self.lifecycle(State::on_abort);
                    self.timers.cancel_all();
                    self.events.on_connection_failed(Error::RetriesExceeded);
                    return;
                }
                self.timers.on_rto_expired();
                let synack = matches!(self.state, State::SynRcvd);
                self.send_syn(now, synack);
                return;
            }
            State::Closed | State::Listen | State::TimeWait => return,
            _ => {}
        }

        if self.timers.retries >= self.config.data_retries {
            let _ = self.lifecycle(State::on_abort);
            self.teardown_error(Error::RetriesExceeded);
            return;
        }
        self.timers.on_rto_expired();

        //= https://www.rfc-editor.org/rfc/rfc6298#section-5.4
        //# Retransmit the earliest segment that has not been acknowledged
        //# by the TCP receiver.
        //
        //= https://www.rfc-editor.org/rfc/rfc5681#section-3.1
        //# Furthermore, upon a timeout (as specified in [RFC2988]) cwnd MUST be
        //# set to no more than the loss window, LW, which equals 1 full-sized
        //# segment
        let previous = self.congestion_state;
        let _ = self.congestion_state.enter_loss();
        self.congestion_transition(previous);
        self.window.ssthresh = self
            .congestion
            .ssthresh(&self.window, self.window.bytes_in_flight);
        self.window.cwnd = self.window.segment_size as u32;
        self.seq.set_recover();
        self.tx.set_sent_list_lost(!self.sack_enabled);
        self.rtt_history.clear();
        self.window.bytes_in_flight = 0;
        self.dup_ack_count = 0;

        // exactly one retransmission; everything else waits for acks
        if let Some(seq) = self.tx.next_seg(false) {
            self.send_data_packet(seq, self.window.segment_size as usize, true, now);
        } else if self.fin_seq.is_some() {
            self.resend_fin(now);
        }
        self.arm_rto(now);
    }

    fn on_persist(&mut self, now: Timestamp) {
        if self.window.advertised_window == 0 {
            self.send_window_probe(now);
            self.timers.arm_persist(now, &self.config);
        } else {
            self.timers.cancel_persist();
            self.send_pending_data(now);
        }
    }

    pub(super) fn arm_rto(&mut self, now: Timestamp) {
        if self.has_rtt_sample {
            self.timers.arm_rto(now, &*self.rtt, &self.config);
        } else {
            //= https://www.rfc-editor.org/rfc/rfc6298#section-2.1
            //# Until a round-trip time (RTT) measurement has been made [...]
            //# the sender SHOULD set RTO <- 1 second
            self.timers
                .arm_rto_at(now, self.config.initial_rto, &self.config);
        }
    }

    /// The receive window to advertise, pinned once the peer's FIN has
    /// been processed
    pub(super) fn advertised_window(&self) -> u32 {
        if let Some(frozen) = self.frozen_advertised_window {
            return frozen;
        }
        let max = (u16::MAX as u32) << self.window.snd_wind_shift;
        (self.rx.available_capacity() as u32).min(max)
    }

    /// The ack number covering everything received, including the peer's
    /// FIN once all data before it has arrived
    pub(super) fn rx_ack_number(&self) -> SeqNumber {
        let next = self.rx.next_rx_sequence();
        if self.rx.finished() {
            next + 1u32
        } else {
            next
        }
    }

    /// The timestamp option value, milliseconds since the first segment
    pub(super) fn ts_value(&mut self, now: Timestamp) -> u32 {
        let epoch = *self.ts_epoch.get_or_insert(now);
        now.saturating_duration_since(epoch).as_millis() as u32
    }

    fn derive_isn(&self) -> SeqNumber {
        if let Some(isn) = self.config.initial_sequence {
            return isn;
        }
        // fnv-1a over the 4-tuple; deterministic, not a security boundary
        let mut hash: u32 = 0x811c_9dc5;
        let mut fold = |bytes: &[u8]| {
            for byte in bytes {
                hash ^= *byte as u32;
                hash = hash.wrapping_mul(0x0100_0193);
            }
        };
        for addr in [self.local_addr, self.peer_addr].into_iter().flatten() {
            match addr.ip() {
                core::net::IpAddr::V4(ip) => fold(&ip.octets()),
                core::net::IpAddr::V6(ip) => fold(&ip.octets()),
            }
            fold(&addr.port().to_be_bytes());
        }
        SeqNumber::new(hash)
    }

    pub(super) fn teardown_normal(&mut self) {
        self.timers.cancel_all();
        self.events.on_normal_close();
    }

    pub(super) fn teardown_error(&mut self, error: Error) {
        self.timers.cancel_all();
        self.events.on_error_close(error);
    }

    /// Applies a lifecycle transition, reporting it to the observer when
    /// it took effect
    pub(super) fn lifecycle(
        &mut self,
        event: impl FnOnce(&mut State) -> state::Result<State>,
    ) -> state::Result<State> {
        let previous = self.state;
        let result = event(&mut self.state);
        if result.is_ok() {
            tracing::debug!(?previous, current = ?self.state, "lifecycle");
            self.events.on_state_change(previous, self.state);
        }
        result
    }

    /// Pushes the current congestion state to the strategy and, when it
    /// moved, to the observer
    pub(super) fn congestion_transition(&mut self, previous: CongestionState) {
        self.congestion
            .congestion_state_set(&mut self.window, self.congestion_state);
        if previous != self.congestion_state {
            tracing::trace!(?previous, current = ?self.congestion_state, "congestion");
            self.events
                .on_congestion_state_change(previous, self.congestion_state);
        }
    }
}

impl core::fmt::Debug for Connection {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("congestion_state", &self.congestion_state)
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .field("seq", &self.seq)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
