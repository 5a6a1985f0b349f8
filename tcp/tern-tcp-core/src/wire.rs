// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Typed model of the TCP header
//!
//! This crate only decides *which* flags and options a segment carries;
//! serialization to and from the byte layout is the wire codec's job and
//! happens outside this workspace.

use crate::seq::SeqNumber;
use bytes::Bytes;
use core::{fmt, ops};
use smallvec::SmallVec;

/// TCP header flags
///
/// Represented as the low 8 bits of the 13th header octet, CWR through
/// FIN.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    pub const FIN: Self = Self(1 << 0);
    pub const SYN: Self = Self(1 << 1);
    pub const RST: Self = Self(1 << 2);
    pub const PSH: Self = Self(1 << 3);
    pub const ACK: Self = Self(1 << 4);
    pub const URG: Self = Self(1 << 5);
    pub const ECE: Self = Self(1 << 6);
    pub const CWR: Self = Self(1 << 7);

    pub const NONE: Self = Self(0);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns the flags without the ECN bits (CWR/ECE)
    ///
    /// Used when matching flag combinations that are valid regardless of
    /// ECN signaling.
    #[inline]
    pub const fn without_ecn(self) -> Self {
        Self(self.0 & !(Self::ECE.0 | Self::CWR.0))
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for Flags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl ops::BitAnd for Flags {
    type Output = Flags;

    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl ops::Sub for Flags {
    type Output = Flags;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 & !rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut empty = true;
        for (flag, name) in [
            (Self::SYN, "SYN"),
            (Self::FIN, "FIN"),
            (Self::RST, "RST"),
            (Self::PSH, "PSH"),
            (Self::ACK, "ACK"),
            (Self::URG, "URG"),
            (Self::ECE, "ECE"),
            (Self::CWR, "CWR"),
        ] {
            if self.contains(flag) {
                if !empty {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                empty = false;
            }
        }
        if empty {
            write!(f, "NONE")?;
        }
        Ok(())
    }
}

/// A contiguous range of received bytes reported by a SACK option
///
/// `left` is the first sequence number of the block; `right` is the
/// sequence number immediately following the last byte of the block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SackBlock {
    pub left: SeqNumber,
    pub right: SeqNumber,
}

/// TCP options carried in the header, as typed values
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TcpOption {
    /// Maximum Segment Size, valid on SYN segments only
    Mss(u16),
    /// Window scale shift count, valid on SYN segments only (RFC 7323)
    WindowScale(u8),
    /// SACK permitted, valid on SYN segments only (RFC 2018)
    SackPermitted,
    /// Selective acknowledgment blocks (RFC 2018)
    Sack(SmallVec<[SackBlock; 4]>),
    /// Timestamp value and echo reply (RFC 7323)
    Timestamps { value: u32, echo: u32 },
}

/// A TCP header with its options, decoded into typed values
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub source_port: u16,
    pub destination_port: u16,
    pub seq: SeqNumber,
    pub ack: SeqNumber,
    pub flags: Flags,
    /// The unscaled window field; scaling is applied by the connection
    /// based on the negotiated shift counts
    pub window: u16,
    pub urgent_pointer: u16,
    pub options: SmallVec<[TcpOption; 4]>,
}

impl Header {
    pub fn new(source_port: u16, destination_port: u16) -> Self {
        Self {
            source_port,
            destination_port,
            seq: SeqNumber::default(),
            ack: SeqNumber::default(),
            flags: Flags::NONE,
            window: 0,
            urgent_pointer: 0,
            options: SmallVec::new(),
        }
    }

    /// Finds the MSS option, if present
    pub fn mss(&self) -> Option<u16> {
        self.options.iter().find_map(|opt| match opt {
            TcpOption::Mss(mss) => Some(*mss),
            _ => None,
        })
    }

    /// Finds the window scale option, if present
    pub fn window_scale(&self) -> Option<u8> {
        self.options.iter().find_map(|opt| match opt {
            TcpOption::WindowScale(shift) => Some(*shift),
            _ => None,
        })
    }

    pub fn sack_permitted(&self) -> bool {
        self.options
            .iter()
            .any(|opt| matches!(opt, TcpOption::SackPermitted))
    }

    /// Finds the SACK blocks, if present
    pub fn sack_blocks(&self) -> Option<&[SackBlock]> {
        self.options.iter().find_map(|opt| match opt {
            TcpOption::Sack(blocks) => Some(blocks.as_slice()),
            _ => None,
        })
    }

    /// Finds the timestamps option, if present
    pub fn timestamps(&self) -> Option<(u32, u32)> {
        self.options.iter().find_map(|opt| match opt {
            TcpOption::Timestamps { value, echo } => Some((*value, *echo)),
            _ => None,
        })
    }
}

/// A TCP segment as handed to (or received from) the wire codec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Bytes,
}

impl Segment {
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// The sequence number following the last byte this segment occupies,
    /// accounting for SYN and FIN each consuming one sequence number.
    pub fn end_seq(&self) -> SeqNumber {
        let mut len = self.payload.len();
        if self.header.flags.contains(Flags::SYN) {
            len += 1;
        }
        if self.header.flags.contains(Flags::FIN) {
            len += 1;
        }
        self.header.seq + len
    }
}

/// The ECN codepoint carried in the IP header of a datagram
///
/// https://www.rfc-editor.org/rfc/rfc3168#section-5
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ExplicitCongestionNotification {
    /// The not-ECT codepoint is set by senders that are not ECN-capable
    #[default]
    NotEct = 0b00,
    /// ECN-capable transport (1)
    Ect1 = 0b01,
    /// ECN-capable transport (0)
    Ect0 = 0b10,
    /// Congestion experienced: set by routers in place of ECT(0)/ECT(1)
    Ce = 0b11,
}

impl ExplicitCongestionNotification {
    /// Returns true if the sender of this datagram declared ECN capability
    #[inline]
    pub fn using_ecn(self) -> bool {
        matches!(self, Self::Ect0 | Self::Ect1)
    }

    /// Returns true if a router reported congestion on this datagram
    #[inline]
    pub fn congestion_experienced(self) -> bool {
        matches!(self, Self::Ce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_ops() {
        let flags = Flags::SYN | Flags::ACK | Flags::ECE;

        assert!(flags.contains(Flags::SYN));
        assert!(flags.contains(Flags::SYN | Flags::ACK));
        assert!(!flags.contains(Flags::FIN));
        assert!(flags.intersects(Flags::FIN | Flags::ACK));
        assert_eq!(flags.without_ecn(), Flags::SYN | Flags::ACK);
        assert_eq!(flags - Flags::ACK, Flags::SYN | Flags::ECE);
    }

    #[test]
    fn flag_debug() {
        let flags = Flags::SYN | Flags::ACK;
        assert_eq!(format!("{flags:?}"), "SYN|ACK");
        assert_eq!(format!("{:?}", Flags::NONE), "NONE");
    }

    #[test]
    fn option_lookup() {
        let mut header = Header::new(1000, 2000);
        header.options.push(TcpOption::Mss(1460));
        header.options.push(TcpOption::WindowScale(7));
        header.options.push(TcpOption::SackPermitted);

        assert_eq!(header.mss(), Some(1460));
        assert_eq!(header.window_scale(), Some(7));
        assert!(header.sack_permitted());
        assert_eq!(header.timestamps(), None);
        assert_eq!(header.sack_blocks(), None);
    }

    #[test]
    fn segment_end_seq() {
        let mut header = Header::new(1, 2);
        header.seq = SeqNumber::new(100);
        header.flags = Flags::SYN;

        let segment = Segment::new(header, Bytes::new());
        assert_eq!(segment.end_seq(), SeqNumber::new(101));

        let mut header = Header::new(1, 2);
        header.seq = SeqNumber::new(100);
        header.flags = Flags::FIN | Flags::ACK;

        let segment = Segment::new(header, Bytes::from_static(b"hello"));
        assert_eq!(segment.end_seq(), SeqNumber::new(106));
    }
}
