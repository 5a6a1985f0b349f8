// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Send and receive buffer contracts
//!
//! The engine never stores payload bytes itself. The send side tracks
//! which ranges have been sent, sacked, declared lost, or retransmitted;
//! the receive side reassembles out-of-order data and reports the ranges
//! a SACK option should carry. Byte-exact storage is the implementor's
//! concern; the `testing` module provides segment-granularity versions
//! sufficient to exercise the engine.

use crate::{seq::SeqNumber, wire::SackBlock};
use bytes::Bytes;
use core::fmt;
use smallvec::SmallVec;

/// Errors reported by buffer implementations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The write does not fit in the remaining capacity
    CapacityExceeded,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded => write!(f, "write exceeds buffer capacity"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// The send-side buffer contract
///
/// Sequence bookkeeping: `head_sequence` is SND.UNA; the buffer covers
/// `head_sequence .. head_sequence + size()`.
pub trait TxBuffer {
    /// Appends application data, returning the number of bytes accepted
    fn enqueue(&mut self, data: Bytes) -> Result<usize, Error>;

    /// The oldest unacknowledged sequence number (SND.UNA)
    fn head_sequence(&self) -> SeqNumber;

    /// Initializes the sequence space; only valid while the buffer is
    /// empty (at connection establishment)
    fn set_head_sequence(&mut self, seq: SeqNumber);

    /// Total bytes held, sent and unsent
    fn size(&self) -> usize;

    /// Bytes remaining from `seq` to the end of the buffer
    fn size_from_sequence(&self, seq: SeqNumber) -> usize;

    /// Space left for application writes
    fn available_capacity(&self) -> usize;

    /// Returns true if bytes beyond the highest sent mark remain
    fn has_unsent_data(&self) -> bool;

    /// Selects the next sequence number to (re)transmit, per the RFC 6675
    /// NextSeg rules: a lost, unretransmitted range first, then unsent
    /// data, then (when `allow_rescue` is set) the rescue retransmission.
    fn next_seg(&mut self, allow_rescue: bool) -> Option<SeqNumber>;

    /// Copies at most `max` bytes starting at `seq` for transmission,
    /// recording the range as sent (and as retransmitted if it had been
    /// sent before)
    fn copy_from_sequence(&mut self, seq: SeqNumber, max: usize) -> Bytes;

    /// Discards everything below `seq` after a cumulative ack, invoking
    /// `on_delivered` with the size of each newly delivered range that
    /// had never been retransmitted (RTT sampling input)
    fn discard_up_to(&mut self, seq: SeqNumber, on_delivered: &mut dyn FnMut(usize));

    /// Applies the blocks of a SACK option; returns true if any new range
    /// was marked
    fn update_sack(&mut self, blocks: &[SackBlock]) -> bool;

    /// Marks the head of the sent list as lost (Reno loss inference)
    fn mark_head_as_lost(&mut self);

    /// Clears the retransmitted flag on the head, forcing the next
    /// `next_seg` to offer it again (SACK partial ack rule)
    fn clear_head_retransmitted(&mut self);

    /// Returns true if the head of the sent list was retransmitted
    fn is_head_retransmitted(&self) -> bool;

    /// Returns true if the range starting at `seq` is considered lost,
    /// per the RFC 6675 IsLost definition or an explicit loss marking
    fn is_lost(&self, seq: SeqNumber) -> bool;

    /// Total bytes currently reported as sacked by the peer
    fn sacked_bytes(&self) -> u32;

    /// Marks the entire sent list as lost after a retransmission timeout;
    /// `reset_sack` additionally clears all sack information (non-SACK
    /// connections keep nothing)
    fn set_sent_list_lost(&mut self, reset_sack: bool);
}

/// The receive-side buffer contract
pub trait RxBuffer {
    /// Initializes RCV.NXT at connection establishment
    fn set_next_rx_sequence(&mut self, seq: SeqNumber);

    /// The next expected sequence number (RCV.NXT)
    fn next_rx_sequence(&self) -> SeqNumber;

    /// Stores received payload; returns false if the data does not fit or
    /// is entirely duplicate
    fn add(&mut self, seq: SeqNumber, payload: Bytes) -> bool;

    /// Removes up to `max` in-order bytes for the application
    fn extract(&mut self, max: usize) -> Bytes;

    /// In-order bytes ready for the application
    fn available(&self) -> usize;

    /// Space left, governing the advertised window
    fn available_capacity(&self) -> usize;

    /// Returns true if out-of-order data is buffered (a gap exists)
    fn has_out_of_order(&self) -> bool;

    /// The ranges a SACK option on the next ack should report, at most
    /// four
    fn sack_blocks(&self) -> SmallVec<[SackBlock; 4]>;

    /// Records the sequence number of a received FIN
    fn set_fin_sequence(&mut self, seq: SeqNumber);

    /// Returns true if a FIN was received and all data before it has
    /// arrived
    fn finished(&self) -> bool;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use alloc::{collections::VecDeque, vec::Vec};
    use bytes::{BufMut, BytesMut};

    /// How many sacked ranges above a range imply it is lost
    //= https://www.rfc-editor.org/rfc/rfc6675#section-4
    //# DupThresh discontiguous
    //# SACKed sequences have arrived above a given sequence number
    const DUP_THRESH: usize = 3;

    #[derive(Clone, Debug)]
    struct SentRange {
        seq: SeqNumber,
        data: Bytes,
        sacked: bool,
        lost: bool,
        retransmitted: bool,
    }

    impl SentRange {
        fn end(&self) -> SeqNumber {
            self.seq + self.data.len()
        }
    }

    /// A segment-granularity send buffer
    ///
    /// Ranges enter the sent list exactly as the engine transmits them, so
    /// sack/lost/retransmitted flags are tracked per transmitted segment
    /// rather than per byte.
    #[derive(Clone, Debug)]
    pub struct TestTxBuffer {
        head: SeqNumber,
        sent: VecDeque<SentRange>,
        unsent: BytesMut,
        capacity: usize,
    }

    impl TestTxBuffer {
        pub fn new(capacity: usize) -> Self {
            Self {
                head: SeqNumber::default(),
                sent: VecDeque::new(),
                unsent: BytesMut::new(),
                capacity,
            }
        }

        fn next_unsent_seq(&self) -> SeqNumber {
            self.sent
                .back()
                .map(|range| range.end())
                .unwrap_or(self.head)
        }

        fn sacked_above(&self, seq: SeqNumber) -> (usize, usize) {
            let mut ranges = 0;
            let mut bytes = 0;
            for range in &self.sent {
                if range.sacked && range.seq > seq {
                    ranges += 1;
                    bytes += range.data.len();
                }
            }
            (ranges, bytes)
        }
    }

    impl TxBuffer for TestTxBuffer {
        fn enqueue(&mut self, data: Bytes) -> Result<usize, Error> {
            if data.len() > self.available_capacity() {
                return Err(Error::CapacityExceeded);
            }
            let len = data.len();
            self.unsent.put(data);
            Ok(len)
        }

        fn head_sequence(&self) -> SeqNumber {
            self.head
        }

        fn set_head_sequence(&mut self, seq: SeqNumber) {
            debug_assert!(self.sent.is_empty());
            self.head = seq;
        }

        fn size(&self) -> usize {
            let sent: usize = self.sent.iter().map(|range| range.data.len()).sum();
            sent + self.unsent.len()
        }

        fn size_from_sequence(&self, seq: SeqNumber) -> usize {
            let end = self.next_unsent_seq() + self.unsent.len();
            end.checked_distance(seq).unwrap_or(0) as usize
        }

        fn available_capacity(&self) -> usize {
            self.capacity.saturating_sub(self.size())
        }

        fn has_unsent_data(&self) -> bool {
            !self.unsent.is_empty()
        }

        fn next_seg(&mut self, allow_rescue: bool) -> Option<SeqNumber> {
            // Rule 1: the earliest lost range not yet retransmitted and
            // not sacked
            for range in &self.sent {
                if range.lost && !range.sacked && !range.retransmitted {
                    return Some(range.seq);
                }
            }

            // Rule 2: unsent data
            if !self.unsent.is_empty() {
                return Some(self.next_unsent_seq());
            }

            // Rule 3: the rescue retransmission, the latest unsacked range
            if allow_rescue {
                for range in self.sent.iter().rev() {
                    if !range.sacked && !range.retransmitted {
                        return Some(range.seq);
                    }
                }
            }

            None
        }

        fn copy_from_sequence(&mut self, seq: SeqNumber, max: usize) -> Bytes {
            // retransmission of an already sent range
            for range in self.sent.iter_mut() {
                if range.seq == seq {
                    range.retransmitted = true;
                    range.lost = false;
                    let len = range.data.len().min(max);
                    return range.data.slice(..len);
                }
            }

            // new data
            debug_assert_eq!(seq, self.next_unsent_seq(), "transmissions must be contiguous");
            let len = self.unsent.len().min(max);
            if len == 0 {
                return Bytes::new();
            }
            let data: Bytes = self.unsent.split_to(len).freeze();
            self.sent.push_back(SentRange {
                seq,
                data: data.clone(),
                sacked: false,
                lost: false,
                retransmitted: false,
            });
            data
        }

        fn discard_up_to(&mut self, seq: SeqNumber, on_delivered: &mut dyn FnMut(usize)) {
            if !(seq > self.head) {
                return;
            }
            while let Some(range) = self.sent.front() {
                if range.end() <= seq {
                    let range = self.sent.pop_front().unwrap();
                    if !range.retransmitted {
                        on_delivered(range.data.len());
                    }
                } else {
                    break;
                }
            }
            // a partial ack inside a range splits it
            if let Some(range) = self.sent.front_mut() {
                if range.seq < seq {
                    let split = seq - range.seq;
                    range.data = range.data.slice(split..);
                    range.seq = seq;
                }
            }
            self.head = seq;
        }

        fn update_sack(&mut self, blocks: &[SackBlock]) -> bool {
            let mut updated = false;
            for block in blocks {
                for range in self.sent.iter_mut() {
                    if !range.sacked && range.seq >= block.left && range.end() <= block.right {
                        range.sacked = true;
                        range.lost = false;
                        updated = true;
                    }
                }
            }

            if updated {
                // re-evaluate loss for everything below the highest sack
                let seqs: Vec<SeqNumber> = self.sent.iter().map(|range| range.seq).collect();
                for seq in seqs {
                    let (ranges, bytes) = self.sacked_above(seq);
                    if ranges >= DUP_THRESH || bytes >= DUP_THRESH * 500 {
                        for range in self.sent.iter_mut() {
                            if range.seq == seq && !range.sacked && !range.retransmitted {
                                range.lost = true;
                            }
                        }
                    }
                }
            }
            updated
        }

        fn mark_head_as_lost(&mut self) {
            if let Some(range) = self.sent.front_mut() {
                range.lost = true;
                range.retransmitted = false;
            }
        }

        fn clear_head_retransmitted(&mut self) {
            if let Some(range) = self.sent.front_mut() {
                range.retransmitted = false;
                range.lost = true;
            }
        }

        fn is_head_retransmitted(&self) -> bool {
            self.sent
                .front()
                .map(|range| range.retransmitted)
                .unwrap_or(false)
        }

        fn is_lost(&self, seq: SeqNumber) -> bool {
            for range in &self.sent {
                if range.seq <= seq && seq < range.end() {
                    if range.lost {
                        return true;
                    }
                    let (ranges, _) = self.sacked_above(seq);
                    return ranges >= DUP_THRESH && !range.sacked;
                }
            }
            false
        }

        fn sacked_bytes(&self) -> u32 {
            self.sent
                .iter()
                .filter(|range| range.sacked)
                .map(|range| range.data.len() as u32)
                .sum()
        }

        fn set_sent_list_lost(&mut self, reset_sack: bool) {
            for range in self.sent.iter_mut() {
                if reset_sack {
                    range.sacked = false;
                }
                if !range.sacked {
                    range.lost = true;
                }
                range.retransmitted = false;
            }
        }
    }

    /// An in-order receive buffer with an out-of-order slab
    #[derive(Clone, Debug)]
    pub struct TestRxBuffer {
        next_rx: SeqNumber,
        ready: BytesMut,
        // out-of-order payloads keyed by start sequence, kept sorted
        out_of_order: Vec<(SeqNumber, Bytes)>,
        fin_seq: Option<SeqNumber>,
        capacity: usize,
    }

    impl TestRxBuffer {
        pub fn new(capacity: usize) -> Self {
            Self {
                next_rx: SeqNumber::default(),
                ready: BytesMut::new(),
                out_of_order: Vec::new(),
                fin_seq: None,
                capacity,
            }
        }

        fn merge_out_of_order(&mut self) {
            while let Some(index) = self
                .out_of_order
                .iter()
                .position(|(seq, _)| *seq <= self.next_rx)
            {
                let (seq, data) = self.out_of_order.remove(index);
                let skip = self.next_rx - seq;
                if skip < data.len() {
                    self.ready.put(data.slice(skip..));
                    self.next_rx = seq + data.len();
                }
            }
        }
    }

    impl RxBuffer for TestRxBuffer {
        fn set_next_rx_sequence(&mut self, seq: SeqNumber) {
            self.next_rx = seq;
        }

        fn next_rx_sequence(&self) -> SeqNumber {
            self.next_rx
        }

        fn add(&mut self, seq: SeqNumber, payload: Bytes) -> bool {
            if payload.is_empty() {
                return false;
            }
            if payload.len() > self.available_capacity() {
                return false;
            }
            let end = seq + payload.len();
            if end <= self.next_rx {
                // entirely duplicate
                return false;
            }
            if seq <= self.next_rx {
                let skip = self.next_rx - seq;
                self.ready.put(payload.slice(skip..));
                self.next_rx = end;
                self.merge_out_of_order();
            } else if !self.out_of_order.iter().any(|(s, _)| *s == seq) {
                self.out_of_order.push((seq, payload));
                self.out_of_order
                    .sort_by(|(a, _), (b, _)| a.partial_cmp(b).expect("seq within window"));
            }
            true
        }

        fn extract(&mut self, max: usize) -> Bytes {
            let len = self.ready.len().min(max);
            self.ready.split_to(len).freeze()
        }

        fn available(&self) -> usize {
            self.ready.len()
        }

        fn available_capacity(&self) -> usize {
            let buffered: usize = self
                .out_of_order
                .iter()
                .map(|(_, data)| data.len())
                .sum::<usize>()
                + self.ready.len();
            self.capacity.saturating_sub(buffered)
        }

        fn has_out_of_order(&self) -> bool {
            !self.out_of_order.is_empty()
        }

        fn sack_blocks(&self) -> SmallVec<[SackBlock; 4]> {
            let mut blocks: SmallVec<[SackBlock; 4]> = SmallVec::new();
            for (seq, data) in &self.out_of_order {
                let end = *seq + data.len();
                if let Some(last) = blocks.last_mut() {
                    if last.right == *seq {
                        last.right = end;
                        continue;
                    }
                }
                if blocks.len() == blocks.capacity() {
                    break;
                }
                blocks.push(SackBlock {
                    left: *seq,
                    right: end,
                });
            }
            blocks
        }

        fn set_fin_sequence(&mut self, seq: SeqNumber) {
            self.fin_seq.get_or_insert(seq);
        }

        fn finished(&self) -> bool {
            self.fin_seq
                .map(|seq| self.next_rx >= seq)
                .unwrap_or(false)
        }
    }

}
