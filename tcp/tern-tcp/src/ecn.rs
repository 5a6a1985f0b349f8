// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Explicit Congestion Notification state (RFC 3168)
//!
//! One controller per connection tracks both the receive side (echoing
//! CE markings as ECE until the peer responds with CWR) and the send
//! side (reacting to a peer's ECE at most once per window).

use crate::config::EcnMode;
use tern_tcp_core::{
    seq::SeqNumber,
    state,
    wire::{ExplicitCongestionNotification, Flags},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EcnState {
    /// Negotiation failed or was never attempted
    #[default]
    Disabled,
    /// ECN negotiated, no congestion signal pending
    Idle,
    /// The IP layer reported CE on a received segment; ECE not yet sent
    CeRcvd,
    /// Echoing ECE on every ack until the peer sends CWR
    SendingEce,
    /// The peer echoed ECE; a window backoff is owed
    EceRcvd,
    /// CWR was sent for the current window
    CwrSent,
}

impl EcnState {
    state::is!(is_enabled, Idle | CeRcvd | SendingEce | EceRcvd | CwrSent);
    state::is!(
        /// Returns true while acks must carry the ECE flag
        is_echoing_ece,
        CeRcvd | SendingEce
    );

    state::event! {
        /// Negotiation confirmed that both ends support ECN
        on_negotiated(Disabled => Idle);
        /// The IP layer delivered a CE-marked segment
        //= https://www.rfc-editor.org/rfc/rfc3168#section-6.1.3
        //# If the receiver receives a CE data packet, it MUST set the
        //# ECE flag in subsequent ACK packets
        on_ce_received(Idle | SendingEce | CwrSent | EceRcvd => CeRcvd);
        /// An ack carrying the ECE echo was handed to the network
        on_ece_sent(CeRcvd => SendingEce);
        /// The peer echoed ECE on an ack
        on_peer_ece(Idle | CwrSent => EceRcvd);
        /// The peer acknowledged our ECE with a CWR flag
        //= https://www.rfc-editor.org/rfc/rfc3168#section-6.1.3
        //# the receiver sets the ECE flag in all ACK
        //# packets [...] until it receives a CWR packet
        on_peer_cwr(CeRcvd | SendingEce => Idle);
        /// The window was reduced and CWR attached to the next data segment
        on_cwr_sent(EceRcvd => CwrSent);
    }
}

#[derive(Debug, Default)]
pub struct EcnController {
    state: EcnState,
    mode: EcnMode,
    /// Sequence number of the segment carrying the last CWR, keying the
    /// once-per-window backoff
    cwr_seq: Option<SeqNumber>,
}

impl EcnController {
    pub fn new(mode: EcnMode) -> Self {
        Self {
            state: EcnState::Disabled,
            mode,
            cwr_seq: None,
        }
    }

    pub fn state(&self) -> &EcnState {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    /// Returns true if an outgoing SYN should request ECN (ECE+CWR set)
    //= https://www.rfc-editor.org/rfc/rfc3168#section-6.1.1
    //# the ECN-setup SYN packet, [...] with the ECE and CWR flags set
    pub fn request_on_syn(&self) -> bool {
        matches!(self.mode, EcnMode::On)
    }

    /// Processes the peer's SYN/ACK on the active side; negotiation
    /// succeeds only if exactly ECE is set
    //= https://www.rfc-editor.org/rfc/rfc3168#section-6.1.1
    //# the ECN-setup SYN-ACK packet, [...] with the ECE flag set but the
    //# CWR flag not set
    pub fn negotiate_active(&mut self, synack_flags: Flags) {
        if !matches!(self.mode, EcnMode::On) {
            return;
        }
        if synack_flags.contains(Flags::ECE) && !synack_flags.contains(Flags::CWR) {
            let _ = self.state.on_negotiated();
        }
    }

    /// Processes a received SYN on the passive side; returns true if the
    /// SYN/ACK should carry the ECE confirmation
    pub fn negotiate_passive(&mut self, syn_flags: Flags) -> bool {
        if matches!(self.mode, EcnMode::Off) {
            return false;
        }
        if syn_flags.contains(Flags::ECE) && syn_flags.contains(Flags::CWR) {
            let _ = self.state.on_negotiated();
            return true;
        }
        false
    }

    /// Records a CE marking from the IP layer; returns true if this is a
    /// new congestion signal the congestion controller should hear about
    pub fn on_ce_received(&mut self) -> bool {
        self.state.on_ce_received().is_ok()
    }

    /// The ECN flags an outgoing ack should carry
    pub fn ack_flags(&mut self) -> Flags {
        if self.state.is_echoing_ece() {
            let _ = self.state.on_ece_sent();
            Flags::ECE
        } else {
            Flags::NONE
        }
    }

    /// Records an ECE flag echoed by the peer on an ack
    pub fn on_peer_ece(&mut self) {
        if self.is_enabled() {
            let _ = self.state.on_peer_ece();
        }
    }

    /// Records a CWR flag from the peer, ending the ECE echo
    pub fn on_peer_cwr(&mut self) {
        if self.is_enabled() {
            let _ = self.state.on_peer_cwr();
        }
    }

    /// Consumes a pending ECE backoff, at most once per window
    ///
    /// Returns true if the window must be halved and CWR attached to the
    /// segment about to be sent at `next_tx`. A second ECE inside the
    /// same window (`snd_una` not yet past the last CWR) is absorbed.
    pub fn take_backoff(&mut self, next_tx: SeqNumber, snd_una: SeqNumber) -> bool {
        if self.state != EcnState::EceRcvd {
            return false;
        }
        if let Some(cwr_seq) = self.cwr_seq {
            if snd_una <= cwr_seq {
                // still inside the window that was already reduced
                let _ = self.state.on_cwr_sent();
                return false;
            }
        }
        self.cwr_seq = Some(next_tx);
        let _ = self.state.on_cwr_sent();
        true
    }

    /// Reports the end of a CWR-reduced window, once
    ///
    /// True when the cumulative ack has moved past the segment that
    /// carried our CWR flag.
    pub fn cwr_acked(&mut self, snd_una: SeqNumber) -> bool {
        match self.cwr_seq {
            Some(cwr_seq) if snd_una > cwr_seq => {
                self.cwr_seq = None;
                true
            }
            _ => false,
        }
    }

    /// The codepoint for an outgoing segment
    ///
    //= https://www.rfc-editor.org/rfc/rfc3168#section-6.1.5
    //# pure acknowledgement packets (e.g., packets that do not contain
    //# any accompanying data) MUST be sent with the not-ECT codepoint.
    //
    //= https://www.rfc-editor.org/rfc/rfc3168#section-6.1.5
    //# ECN-capable TCP implementations MUST NOT set either ECT codepoint
    //# [...] on retransmitted data packets
    pub fn ecn_codepoint(
        &self,
        has_payload: bool,
        is_retransmission: bool,
    ) -> ExplicitCongestionNotification {
        if self.is_enabled() && has_payload && !is_retransmission {
            ExplicitCongestionNotification::Ect0
        } else {
            ExplicitCongestionNotification::NotEct
        }
    }

    pub fn disable(&mut self) {
        self.state = EcnState::Disabled;
        self.cwr_seq = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_controller() -> EcnController {
        let mut ecn = EcnController::new(EcnMode::On);
        ecn.negotiate_active(Flags::ECE);
        assert!(ecn.is_enabled());
        ecn
    }

    #[test]
    fn negotiation() {
        // active side requires exactly ECE on the SYN/ACK
        let mut ecn = EcnController::new(EcnMode::On);
        ecn.negotiate_active(Flags::ECE | Flags::CWR);
        assert!(!ecn.is_enabled());
        ecn.negotiate_active(Flags::ECE);
        assert!(ecn.is_enabled());

        // Off never negotiates
        let mut ecn = EcnController::new(EcnMode::Off);
        assert!(!ecn.negotiate_passive(Flags::ECE | Flags::CWR));
        assert!(!ecn.is_enabled());

        // AcceptOnly answers a request but never makes one
        let mut ecn = EcnController::new(EcnMode::AcceptOnly);
        assert!(!ecn.request_on_syn());
        assert!(ecn.negotiate_passive(Flags::ECE | Flags::CWR));
        assert!(ecn.is_enabled());

        // a plain SYN disables ECN on the passive side
        let mut ecn = EcnController::new(EcnMode::On);
        assert!(!ecn.negotiate_passive(Flags::NONE));
        assert!(!ecn.is_enabled());
    }

    #[test]
    fn ce_echo_until_cwr() {
        let mut ecn = enabled_controller();

        assert!(ecn.on_ce_received());
        assert_eq!(ecn.ack_flags(), Flags::ECE);
        // keeps echoing on every ack
        assert_eq!(ecn.ack_flags(), Flags::ECE);

        ecn.on_peer_cwr();
        assert_eq!(ecn.ack_flags(), Flags::NONE);
        assert_eq!(*ecn.state(), EcnState::Idle);
    }

    #[test]
    fn backoff_once_per_window() {
        let mut ecn = enabled_controller();
        let una = SeqNumber::new(1000);
        let next = SeqNumber::new(5000);

        ecn.on_peer_ece();
        assert!(ecn.take_backoff(next, una));
        assert_eq!(*ecn.state(), EcnState::CwrSent);

        // a second ECE before snd_una passes the cwr point is absorbed
        ecn.on_peer_ece();
        assert!(!ecn.take_backoff(next + 500u32, una));

        // once the window that saw the reduction is acked, a new ECE
        // triggers a new backoff
        ecn.on_peer_ece();
        assert!(ecn.take_backoff(SeqNumber::new(9000), SeqNumber::new(6000)));
    }

    #[test]
    fn cwr_completion_reports_once() {
        let mut ecn = enabled_controller();
        ecn.on_peer_ece();
        assert!(ecn.take_backoff(SeqNumber::new(5000), SeqNumber::new(1000)));

        // acks inside the reduced window do not complete it
        assert!(!ecn.cwr_acked(SeqNumber::new(3000)));
        assert!(!ecn.cwr_acked(SeqNumber::new(5000)));

        assert!(ecn.cwr_acked(SeqNumber::new(5001)));
        // reported exactly once
        assert!(!ecn.cwr_acked(SeqNumber::new(6000)));
    }

    #[test]
    fn codepoints() {
        let ecn = enabled_controller();
        assert_eq!(
            ecn.ecn_codepoint(true, false),
            ExplicitCongestionNotification::Ect0
        );
        assert_eq!(
            ecn.ecn_codepoint(false, false),
            ExplicitCongestionNotification::NotEct
        );
        assert_eq!(
            ecn.ecn_codepoint(true, true),
            ExplicitCongestionNotification::NotEct
        );

        let ecn = EcnController::new(EcnMode::Off);
        assert_eq!(
            ecn.ecn_codepoint(true, false),
            ExplicitCongestionNotification::NotEct
        );
    }

    #[test]
    fn disabled_ignores_signals() {
        let mut ecn = EcnController::new(EcnMode::Off);
        assert!(!ecn.on_ce_received());
        ecn.on_peer_ece();
        assert!(!ecn.take_backoff(SeqNumber::new(1), SeqNumber::new(0)));
        assert_eq!(ecn.ack_flags(), Flags::NONE);
    }
}
