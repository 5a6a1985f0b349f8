// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection observer callbacks
//!
//! Everything the engine used to report through trace hooks is delivered
//! to a [`ConnectionEvents`] implementation passed at construction. All
//! methods default to no-ops so observers implement only what they need.

use crate::{congestion::CongestionState, error::Error, lifecycle::State};
use core::net::SocketAddr;

/// Callbacks invoked by the connection as it progresses
///
/// Callbacks are invoked synchronously from within the engine entry
/// points (`on_segment`, `on_timeout`, the socket operations); observers
/// must not reenter the connection.
pub trait ConnectionEvents {
    /// The three-way handshake completed and the connection is writable
    fn on_connection_succeeded(&mut self) {}

    /// The connection attempt failed before reaching the established state
    fn on_connection_failed(&mut self, _error: Error) {}

    /// In-order data became available to read
    fn on_data_received(&mut self) {}

    /// `count` bytes of new application data were handed to the network
    fn on_data_sent(&mut self, _count: usize) {}

    /// The connection closed cleanly
    fn on_normal_close(&mut self) {}

    /// The connection was torn down by a reset or exhausted retries
    fn on_error_close(&mut self, _error: Error) {}

    /// The lifecycle state machine moved from `previous` to `current`
    fn on_state_change(&mut self, _previous: State, _current: State) {}

    /// The congestion state machine moved from `previous` to `current`
    fn on_congestion_state_change(
        &mut self,
        _previous: CongestionState,
        _current: CongestionState,
    ) {
    }

    /// A listener received a SYN and spawned a connection for `from`
    fn on_incoming_connection(&mut self, _from: SocketAddr) {}
}

/// An observer that ignores every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NullEvents;

impl ConnectionEvents for NullEvents {}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use alloc::rc::Rc;
    use core::cell::RefCell;

    /// Counts every callback for assertions
    #[derive(Clone, Copy, Debug, Default)]
    pub struct RecordedEvents {
        pub succeeded: u32,
        pub failed: u32,
        pub data_received: u32,
        pub data_sent_bytes: usize,
        pub normal_close: u32,
        pub error_close: u32,
        pub incoming: u32,
        pub state_changes: u32,
        pub congestion_changes: u32,
        pub last_error: Option<Error>,
        pub last_state: Option<State>,
        pub last_congestion_state: Option<CongestionState>,
    }

    impl ConnectionEvents for RecordedEvents {
        fn on_connection_succeeded(&mut self) {
            self.succeeded += 1;
        }

        fn on_connection_failed(&mut self, error: Error) {
            self.failed += 1;
            self.last_error = Some(error);
        }

        fn on_data_received(&mut self) {
            self.data_received += 1;
        }

        fn on_data_sent(&mut self, count: usize) {
            self.data_sent_bytes += count;
        }

        fn on_normal_close(&mut self) {
            self.normal_close += 1;
        }

        fn on_error_close(&mut self, error: Error) {
            self.error_close += 1;
            self.last_error = Some(error);
        }

        fn on_state_change(&mut self, _previous: State, current: State) {
            self.state_changes += 1;
            self.last_state = Some(current);
        }

        fn on_congestion_state_change(&mut self, _previous: CongestionState, current: CongestionState) {
            self.congestion_changes += 1;
            self.last_congestion_state = Some(current);
        }

        fn on_incoming_connection(&mut self, _from: SocketAddr) {
            self.incoming += 1;
        }
    }

    /// A shared handle so tests can keep inspecting the recorder after
    /// handing it to a connection
    impl ConnectionEvents for Rc<RefCell<RecordedEvents>> {
        fn on_connection_succeeded(&mut self) {
            self.borrow_mut().on_connection_succeeded();
        }

        fn on_connection_failed(&mut self, error: Error) {
            self.borrow_mut().on_connection_failed(error);
        }

        fn on_data_received(&mut self) {
            self.borrow_mut().on_data_received();
        }

        fn on_data_sent(&mut self, count: usize) {
            self.borrow_mut().on_data_sent(count);
        }

        fn on_normal_close(&mut self) {
            self.borrow_mut().on_normal_close();
        }

        fn on_error_close(&mut self, error: Error) {
            self.borrow_mut().on_error_close(error);
        }

        fn on_state_change(&mut self, previous: State, current: State) {
            self.borrow_mut().on_state_change(previous, current);
        }

        fn on_congestion_state_change(&mut self, previous: CongestionState, current: CongestionState) {
            self.borrow_mut().on_congestion_state_change(previous, current);
        }

        fn on_incoming_connection(&mut self, from: SocketAddr) {
            self.borrow_mut().on_incoming_connection(from);
        }
    }
}
