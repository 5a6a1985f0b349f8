// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sequence space and round-trip sampling bookkeeping

use smallvec::SmallVec;
use tern_tcp_core::{
    seq::SeqNumber,
    time::{Duration, Timestamp},
};

/// The sender and receiver sequence marks of one connection
///
/// `high_tx_mark >= next_tx` holds at all times; `recover` is only
/// meaningful during a recovery episode and never decreases within one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SequenceSpace {
    /// The next sequence number handed to the network (SND.NXT)
    pub next_tx: SeqNumber,
    /// The highest sequence number ever sent plus one
    pub high_tx_mark: SeqNumber,
    /// The recovery point; set to `high_tx_mark` on loss or recovery entry
    pub recover: SeqNumber,
    /// The highest in-order sequence number received plus one
    pub high_rx: SeqNumber,
    /// The highest cumulative ack number seen from the peer
    pub high_rx_ack: SeqNumber,
}

impl SequenceSpace {
    pub fn new(isn: SeqNumber) -> Self {
        Self {
            next_tx: isn,
            high_tx_mark: isn,
            recover: isn,
            high_rx: SeqNumber::default(),
            high_rx_ack: isn,
        }
    }

    /// Records a transmission ending at `end`
    pub fn on_send(&mut self, end: SeqNumber) {
        if self.next_tx < end {
            self.next_tx = end;
        }
        self.high_tx_mark = self.high_tx_mark.max(end);
        debug_assert!(self.next_tx <= self.high_tx_mark);
    }

    /// Pins the recovery point at the highest transmitted mark
    pub fn set_recover(&mut self) {
        self.recover = self.high_tx_mark;
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RttHistoryEntry {
    pub seq: SeqNumber,
    pub size: usize,
    pub sent_at: Timestamp,
    pub retransmitted: bool,
}

impl RttHistoryEntry {
    fn end(&self) -> SeqNumber {
        self.seq + self.size
    }
}

/// Send timestamps of in-flight ranges, for RTT sampling
///
/// One entry is appended per contiguous send; a cumulative ack prunes
/// every entry it covers and yields at most one sample. Entries that
/// were retransmitted never produce a sample (Karn's algorithm), since
/// the ack cannot be attributed to a particular transmission.
//= https://www.rfc-editor.org/rfc/rfc6298#section-3
//# TCP MUST use Karn's algorithm [KP87] for taking RTT samples.  That
//# is, RTT samples MUST NOT be made using segments that were
//# retransmitted
#[derive(Debug, Default)]
pub struct RttHistory {
    entries: SmallVec<[RttHistoryEntry; 8]>,
}

impl RttHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a send; a sequence number falling inside an existing entry
    /// marks that entry (and everything after it) as retransmitted
    pub fn on_send(&mut self, seq: SeqNumber, size: usize, now: Timestamp) {
        if let Some(first) = self
            .entries
            .iter()
            .position(|entry| entry.seq <= seq && seq < entry.end())
        {
            for entry in &mut self.entries[first..] {
                entry.retransmitted = true;
            }
            return;
        }

        self.entries.push(RttHistoryEntry {
            seq,
            size,
            sent_at: now,
            retransmitted: false,
        });
    }

    /// Prunes entries fully covered by the cumulative ack `ack` and
    /// returns an RTT sample from the oldest covered entry, unless that
    /// entry was retransmitted
    pub fn sample_for(&mut self, ack: SeqNumber, now: Timestamp) -> Option<Duration> {
        let mut sample = None;

        while let Some(entry) = self.entries.first() {
            if ack < entry.end() {
                break;
            }
            if sample.is_none() && !entry.retransmitted {
                sample = Some(now.saturating_duration_since(entry.sent_at));
            }
            self.entries.remove(0);
        }

        sample
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
