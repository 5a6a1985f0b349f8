// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{buffer, state};
use core::fmt;

/// Errors surfaced to the socket consumer
///
/// Malformed segments never produce an `Error`; they are answered on the
/// wire (ACK or RST) and dropped. Errors are reserved for illegal local
/// operations and fatal connection teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, displaydoc::Display)]
#[non_exhaustive]
pub enum Error {
    /// The requested local address is already bound
    AddrInUse,

    /// No local endpoint could be allocated for the connection
    AddrNotAvailable,

    /// The operation requires an established connection
    NotConnected,

    /// The operation is not legal in the current connection state
    InvalidState,

    /// The write exceeds the send buffer capacity
    MessageTooLarge,

    /// The send direction was already shut down
    Shutdown,

    /// The retransmission retry budget was exhausted
    RetriesExceeded,

    /// The peer reset the connection
    Reset,
}

impl<T: fmt::Debug> From<state::Error<T>> for Error {
    fn from(_: state::Error<T>) -> Self {
        Self::InvalidState
    }
}

impl From<buffer::Error> for Error {
    fn from(error: buffer::Error) -> Self {
        match error {
            buffer::Error::CapacityExceeded => Self::MessageTooLarge,
        }
    }
}

#[cfg(feature = "std")]
impl From<Error> for std::io::ErrorKind {
    fn from(error: Error) -> Self {
        use std::io::ErrorKind;
        match error {
            Error::AddrInUse => ErrorKind::AddrInUse,
            Error::AddrNotAvailable => ErrorKind::AddrNotAvailable,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::InvalidState => ErrorKind::InvalidInput,
            Error::MessageTooLarge => ErrorKind::InvalidData,
            Error::Shutdown => ErrorKind::BrokenPipe,
            Error::RetriesExceeded => ErrorKind::TimedOut,
            Error::Reset => ErrorKind::ConnectionReset,
        }
    }
}

#[cfg(feature = "std")]
impl From<Error> for std::io::Error {
    fn from(error: Error) -> Self {
        let kind = error.into();
        std::io::Error::new(kind, error)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
