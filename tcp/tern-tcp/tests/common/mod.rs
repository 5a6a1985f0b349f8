// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared harness: a client/server connection pair exchanging segments
//! over an in-memory pipe, driven by a manually advanced clock

#![allow(dead_code)]

use std::{cell::RefCell, net::SocketAddr, rc::Rc};
use tern_tcp::{
    connection::{ChildResources, Collaborators, Connection, State, Transmission},
    endpoint::Endpoint,
    Config,
};
use tern_tcp_core::{
    buffer::testing::{TestRxBuffer, TestTxBuffer},
    congestion::testing::{MockCongestion, MockRecovery},
    event::{testing::RecordedEvents, ConnectionEvents, NullEvents},
    rtt::MeanDeviation,
    seq::SeqNumber,
    time::{clock::testing, Clock as _, Timestamp},
};

pub const MSS: usize = 536;

/// Larger than the configured receive window so the advertised window
/// stays pinned at its cap while segments are buffered out of order
pub const BUFFER_CAP: usize = 1 << 20;

pub fn test_config() -> Config {
    Config::new()
        .with_initial_sequence(Some(SeqNumber::new(3000)))
        .unwrap()
}

pub fn connection(config: Config) -> Connection {
    connection_with_events(config, Box::new(NullEvents))
}

pub fn connection_with_events(config: Config, events: Box<dyn ConnectionEvents>) -> Connection {
    Connection::new(
        config,
        Collaborators {
            tx: Box::new(TestTxBuffer::new(BUFFER_CAP)),
            rx: Box::new(TestRxBuffer::new(BUFFER_CAP)),
            rtt: Box::new(MeanDeviation::new()),
            congestion: Box::new(MockCongestion::default()),
            recovery: Box::new(MockRecovery::default()),
            events,
        },
    )
}

pub fn child_resources() -> ChildResources {
    ChildResources {
        tx: Box::new(TestTxBuffer::new(BUFFER_CAP)),
        rx: Box::new(TestRxBuffer::new(BUFFER_CAP)),
        events: Box::new(NullEvents),
    }
}

pub fn server_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// Delivers everything `from` has queued to `to`, in order
pub fn deliver_all(from: &mut Connection, to: &mut Connection, now: Timestamp) -> usize {
    let source = from.local_addr().expect("sender must be bound");
    let mut delivered = 0;
    while let Some(transmission) = from.poll_transmit() {
        to.on_segment(transmission.segment, transmission.ecn, source, now);
        delivered += 1;
    }
    delivered
}

/// Shuttles segments both ways until neither side has anything queued
pub fn pump(a: &mut Connection, b: &mut Connection, now: Timestamp) {
    loop {
        let moved = deliver_all(a, b, now) + deliver_all(b, a, now);
        if moved == 0 {
            break;
        }
    }
}

/// Takes every queued transmission for inspection
pub fn drain(connection: &mut Connection) -> Vec<Transmission> {
    let mut out = Vec::new();
    while let Some(transmission) = connection.poll_transmit() {
        out.push(transmission);
    }
    out
}

pub fn deliver(to: &mut Connection, transmission: Transmission, from: SocketAddr, now: Timestamp) {
    to.on_segment(transmission.segment, transmission.ecn, from, now);
}

/// Runs the three-way handshake over the pipe and returns the
/// established pair
pub fn established_pair(config: Config) -> (Connection, Connection, testing::Clock) {
    let clock = testing::Clock::default();
    let mut endpoint = Endpoint::new();

    let mut listener = connection(config);
    listener.bind(&mut endpoint, server_addr()).unwrap();
    listener.listen(Box::new(child_resources)).unwrap();

    let mut client = connection(config);
    client
        .connect(&mut endpoint, server_addr(), clock.get_time())
        .unwrap();

    deliver_all(&mut client, &mut listener, clock.get_time());
    let mut server = listener.accept().expect("the SYN spawns a connection");
    pump(&mut client, &mut server, clock.get_time());

    assert_eq!(client.state(), &State::Established);
    assert_eq!(server.state(), &State::Established);
    (client, server, clock)
}

/// Like [`established_pair`], with a shared recorder observing the
/// client side
pub fn established_pair_with_events(
    config: Config,
) -> (
    Connection,
    Connection,
    testing::Clock,
    Rc<RefCell<RecordedEvents>>,
) {
    let clock = testing::Clock::default();
    let mut endpoint = Endpoint::new();

    let mut listener = connection(config);
    listener.bind(&mut endpoint, server_addr()).unwrap();
    listener.listen(Box::new(child_resources)).unwrap();

    let events = Rc::new(RefCell::new(RecordedEvents::default()));
    let mut client = connection_with_events(config, Box::new(events.clone()));
    client
        .connect(&mut endpoint, server_addr(), clock.get_time())
        .unwrap();

    deliver_all(&mut client, &mut listener, clock.get_time());
    let mut server = listener.accept().expect("the SYN spawns a connection");
    pump(&mut client, &mut server, clock.get_time());

    assert_eq!(client.state(), &State::Established);
    (client, server, clock, events)
}

/// Advances the clock to the connection's next deadline and fires it
pub fn expire_next(connection: &mut Connection, clock: &testing::Clock) -> Timestamp {
    let deadline = connection.next_timeout().expect("a timer must be armed");
    clock.advance_to(deadline);
    connection.on_timeout(deadline);
    deadline
}
