// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{cmp, fmt, ops};

//= https://www.rfc-editor.org/rfc/rfc9293#section-3.4
//# The typical kinds of sequence number comparisons that the TCP
//# implementation must perform include:
//#
//#    (a)  Determining that an acknowledgment refers to some sequence
//#         number sent but not yet acknowledged.
//#
//#    (b)  Determining that all sequence numbers occupied by a segment
//#         have been acknowledged (e.g., to remove the segment from a
//#         retransmission queue).

/// A TCP sequence number
///
/// Sequence numbers are 32-bit counters that wrap around; all comparisons
/// are performed on the signed difference of the two operands, which is
/// well defined as long as the compared numbers are within `2^31 - 1` of
/// each other.
///
/// Note that `SeqNumber` intentionally only implements `PartialOrd`:
/// wraparound comparison is not transitive, so a total order does not
/// exist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SeqNumber(u32);

impl SeqNumber {
    /// Creates a sequence number from its wire representation
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the wire representation of the sequence number
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the number of bytes between `self` and an earlier sequence
    /// number `rhs`, or `None` if `rhs` is ahead of `self`.
    #[inline]
    pub fn checked_distance(self, rhs: Self) -> Option<u32> {
        let delta = self.0.wrapping_sub(rhs.0) as i32;
        if delta >= 0 {
            Some(delta as u32)
        } else {
            None
        }
    }

    /// Returns the larger of the two sequence numbers in wraparound order
    #[inline]
    pub fn max(self, other: Self) -> Self {
        if self < other {
            other
        } else {
            self
        }
    }

    /// Returns the smaller of the two sequence numbers in wraparound order
    #[inline]
    pub fn min(self, other: Self) -> Self {
        if other < self {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SeqNumber {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl ops::Add<u32> for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn add(self, rhs: u32) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs))
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn add(self, rhs: usize) -> SeqNumber {
        debug_assert!(rhs <= u32::MAX as usize);
        SeqNumber(self.0.wrapping_add(rhs as u32))
    }
}

impl ops::AddAssign<u32> for SeqNumber {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    #[inline]
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

impl ops::Sub<u32> for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn sub(self, rhs: u32) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(rhs))
    }
}

impl ops::Sub for SeqNumber {
    type Output = usize;

    /// Returns the distance in bytes between two sequence numbers
    ///
    /// Panics if `rhs` is ahead of `self` in wraparound order.
    #[inline]
    fn sub(self, rhs: SeqNumber) -> usize {
        self.checked_distance(rhs)
            .expect("sequence number subtraction underflow") as usize
    }
}

impl cmp::PartialOrd for SeqNumber {
    #[inline]
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        let delta = self.0.wrapping_sub(other.0) as i32;
        delta.partial_cmp(&0)
    }
}

#[cfg(any(test, feature = "testing"))]
impl bolero_generator::TypeGenerator for SeqNumber {
    fn generate<D: bolero_generator::Driver>(driver: &mut D) -> Option<Self> {
        Some(Self(u32::generate(driver)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering() {
        let a = SeqNumber::new(100);
        let b = SeqNumber::new(200);

        assert!(a < b);
        assert!(b > a);
        assert_eq!(b - a, 100);
        assert_eq!(a.max(b), b);
        assert_eq!(a.min(b), a);
    }

    #[test]
    fn wraparound() {
        let a = SeqNumber::new(u32::MAX - 10);
        let b = a + 20u32;

        assert_eq!(b.as_u32(), 9);
        assert!(a < b);
        assert_eq!(b - a, 20);
        assert_eq!(a.checked_distance(b), None);
        assert_eq!(a.max(b), b);
    }

    #[test]
    fn arithmetic() {
        let mut a = SeqNumber::new(1000);
        a += 500u32;
        assert_eq!(a, SeqNumber::new(1500));
        assert_eq!(a - 250u32, SeqNumber::new(1250));
    }

    /// Any positive delta below 2^31 preserves ordering across wraparound
    #[test]
    #[cfg_attr(miri, ignore)]
    fn ordering_check() {
        bolero::check!()
            .with_type::<(u32, u32)>()
            .for_each(|&(base, delta)| {
                let delta = delta % (1 << 31);
                let a = SeqNumber::new(base);
                let b = a + delta;

                if delta == 0 {
                    assert_eq!(a, b);
                } else {
                    assert!(a < b);
                    assert!(b > a);
                }
                assert_eq!(b - a, delta as usize);
            });
    }
}
