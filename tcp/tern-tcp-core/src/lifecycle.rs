// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::state;

/// The connection lifecycle states
///
//= https://www.rfc-editor.org/rfc/rfc9293#section-3.3.2
//# A connection progresses through a series of states during its
//# lifetime.  The states are:  LISTEN, SYN-SENT, SYN-RECEIVED,
//# ESTABLISHED, FIN-WAIT-1, FIN-WAIT-2, CLOSE-WAIT, CLOSING, LAST-ACK,
//# TIME-WAIT, and the fictional state CLOSED.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum State {
    #[default]
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl State {
    state::is!(is_closed, Closed);
    state::is!(
        /// Returns true once a sequence space has been agreed with the peer
        is_synchronized,
        Established | FinWait1 | FinWait2 | CloseWait | Closing | LastAck | TimeWait
    );
    state::is!(
        /// Returns true while new application data may be sent
        may_send_data,
        Established | CloseWait
    );
    state::is!(
        /// Returns true while data from the peer is still accepted
        may_receive_data,
        Established | FinWait1 | FinWait2
    );
    state::is!(
        /// Returns true once a FIN has been sent and the close is in progress
        is_local_closing,
        FinWait1 | FinWait2 | Closing | LastAck | TimeWait
    );

    state::event! {
        /// An active open, or a reopen from a half-closed state
        on_connect(Closed | Listen | SynSent | LastAck | CloseWait => SynSent);
        /// A passive open
        on_listen(Closed => Listen);
        /// A listener accepted a SYN and spawned this connection
        on_passive_syn(Listen => SynRcvd);
        /// A SYN crossed our SYN in flight (simultaneous open)
        on_simultaneous_syn(SynSent => SynRcvd);
        /// The three-way handshake completed
        on_handshake_complete(SynSent | SynRcvd => Established);
        /// The local side sent its FIN
        on_local_close(Established => FinWait1, CloseWait => LastAck);
        /// The peer acknowledged our FIN
        on_fin_acked(FinWait1 => FinWait2, Closing => TimeWait, LastAck => Closed);
        /// The peer's FIN arrived in order
        on_peer_fin(
            Established | SynRcvd => CloseWait,
            FinWait1 => Closing,
            FinWait2 => TimeWait,
        );
        /// The 2×MSL quiet period elapsed
        on_time_wait_expired(TimeWait => Closed);
        /// A reset, fatal error, or exhausted retry budget
        on_abort(
            Listen | SynSent | SynRcvd | Established | FinWait1 | FinWait2 | CloseWait
            | Closing | LastAck | TimeWait => Closed,
        );
    }
}
