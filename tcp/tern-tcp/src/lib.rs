// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A TCP connection engine for user-space and simulated network stacks
//!
//! The crate implements the per-connection state machine of RFC 9293 with
//! the loss recovery of RFC 5681/6675, selective acknowledgments (RFC
//! 2018), and explicit congestion notification (RFC 3168). It owns no
//! sockets, no clock, and no wire encoding: segments arrive as typed
//! [`tern_tcp_core::wire::Segment`] values, outbound segments are drained
//! through [`connection::Connection::poll_transmit`], and all waiting is
//! expressed through pollable timers driven by the caller.

pub mod config;
pub mod connection;
pub mod ecn;
pub mod endpoint;
pub mod timers;
pub mod tracking;

pub use config::Config;
pub use connection::Connection;
pub use tern_tcp_core::error::{self, Error};

/// Result type for socket-facing operations
pub type Result<T, E = Error> = core::result::Result<T, E>;
