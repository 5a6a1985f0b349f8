// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection establishment over the in-memory pipe

mod common;

use common::*;
use std::{cell::RefCell, rc::Rc};
use tern_tcp::{
    connection::{ChildResources, State},
    endpoint::Endpoint,
    Config, Error,
};
use tern_tcp_core::{
    buffer::testing::{TestRxBuffer, TestTxBuffer},
    event::testing::RecordedEvents,
    seq::SeqNumber,
    time::{clock::testing, Clock as _},
    wire::{ExplicitCongestionNotification, Flags, Header, Segment},
};

#[test]
fn three_way_handshake() {
    let clock = testing::Clock::default();
    let mut endpoint = Endpoint::new();

    let client_events = Rc::new(RefCell::new(RecordedEvents::default()));
    let listener_events = Rc::new(RefCell::new(RecordedEvents::default()));
    let child_events = Rc::new(RefCell::new(RecordedEvents::default()));

    let mut listener = connection_with_events(test_config(), Box::new(listener_events.clone()));
    listener.bind(&mut endpoint, server_addr()).unwrap();
    let factory_events = child_events.clone();
    listener
        .listen(Box::new(move || ChildResources {
            tx: Box::new(TestTxBuffer::new(BUFFER_CAP)),
            rx: Box::new(TestRxBuffer::new(BUFFER_CAP)),
            events: Box::new(factory_events.clone()),
        }))
        .unwrap();

    let mut client = connection_with_events(test_config(), Box::new(client_events.clone()));
    client
        .connect(&mut endpoint, server_addr(), clock.get_time())
        .unwrap();
    assert_eq!(client.state(), &State::SynSent);

    let mut syn = drain(&mut client);
    assert_eq!(syn.len(), 1);
    {
        let header = &syn[0].segment.header;
        assert_eq!(header.flags, Flags::SYN);
        assert_eq!(header.seq, SeqNumber::new(3000));
        assert_eq!(header.mss(), Some(536));
        assert!(header.sack_permitted());
        assert_eq!(header.window_scale(), Some(0));
        assert!(header.timestamps().is_some());
    }

    let client_addr = client.local_addr().unwrap();
    deliver(
        &mut listener,
        syn.remove(0),
        client_addr,
        clock.get_time(),
    );
    assert_eq!(listener_events.borrow().incoming, 1);
    assert_eq!(listener.state(), &State::Listen);

    let mut server = listener.accept().expect("the SYN spawns a connection");
    assert_eq!(server.state(), &State::SynRcvd);
    assert_eq!(server.peer_addr(), Some(client_addr));

    let mut synack = drain(&mut server);
    assert_eq!(synack.len(), 1);
    {
        let header = &synack[0].segment.header;
        assert_eq!(header.flags, Flags::SYN | Flags::ACK);
        assert_eq!(header.ack, SeqNumber::new(3001));
        assert!(header.sack_permitted());
    }

    deliver(&mut client, synack.remove(0), server_addr(), clock.get_time());
    assert_eq!(client.state(), &State::Established);
    assert_eq!(client_events.borrow().succeeded, 1);
    assert!(client.is_sack_enabled());

    deliver_all(&mut client, &mut server, clock.get_time());
    assert_eq!(server.state(), &State::Established);
    assert_eq!(child_events.borrow().succeeded, 1);
    assert!(server.is_sack_enabled());

    // the observers saw each lifecycle transition
    assert_eq!(client_events.borrow().state_changes, 2);
    assert_eq!(client_events.borrow().last_state, Some(State::Established));
    assert_eq!(child_events.borrow().state_changes, 3);
    assert_eq!(child_events.borrow().last_state, Some(State::Established));

    // nothing left in flight, nothing scheduled
    assert_eq!(client.next_timeout(), None);
    assert_eq!(server.next_timeout(), None);
}

fn asymmetric_pair(client_config: Config, server_config: Config) -> (
    tern_tcp::Connection,
    tern_tcp::Connection,
) {
    let clock = testing::Clock::default();
    let mut endpoint = Endpoint::new();

    let mut listener = connection(server_config);
    listener.bind(&mut endpoint, server_addr()).unwrap();
    listener.listen(Box::new(child_resources)).unwrap();

    let mut client = connection(client_config);
    client
        .connect(&mut endpoint, server_addr(), clock.get_time())
        .unwrap();

    deliver_all(&mut client, &mut listener, clock.get_time());
    let mut server = listener.accept().unwrap();
    pump(&mut client, &mut server, clock.get_time());
    (client, server)
}

//= https://www.rfc-editor.org/rfc/rfc2018#section-2
//= type=test
//# This option MAY be sent in a SYN segment by a TCP that has been
//# extended to receive [...] the SACK option
#[test]
fn sack_requires_both_sides() {
    let without_sack = test_config().with_sack(false).unwrap();

    let (client, server) = asymmetric_pair(without_sack, test_config());
    assert_eq!(client.state(), &State::Established);
    assert!(!client.is_sack_enabled());
    assert!(!server.is_sack_enabled());

    let (client, server) = asymmetric_pair(test_config(), without_sack);
    assert!(!client.is_sack_enabled());
    assert!(!server.is_sack_enabled());
}

#[test]
fn mss_is_clamped_to_the_peers_offer() {
    let small = test_config().with_segment_size(512).unwrap();
    let (client, server) = asymmetric_pair(test_config(), small);

    assert_eq!(client.window().segment_size, 512);
    assert_eq!(server.window().segment_size, 512);
}

#[test]
fn simultaneous_open() {
    let clock = testing::Clock::default();
    let mut endpoint = Endpoint::new();
    let a_addr: std::net::SocketAddr = "127.0.0.1:1111".parse().unwrap();
    let b_addr: std::net::SocketAddr = "127.0.0.1:2222".parse().unwrap();

    let mut a = connection(test_config());
    a.bind(&mut endpoint, a_addr).unwrap();
    let mut b = connection(test_config());
    b.bind(&mut endpoint, b_addr).unwrap();

    a.connect(&mut endpoint, b_addr, clock.get_time()).unwrap();
    b.connect(&mut endpoint, a_addr, clock.get_time()).unwrap();

    // the SYNs cross in flight
    deliver_all(&mut a, &mut b, clock.get_time());
    assert_eq!(b.state(), &State::SynRcvd);
    pump(&mut a, &mut b, clock.get_time());

    assert_eq!(a.state(), &State::Established);
    assert_eq!(b.state(), &State::Established);
}

//= https://www.rfc-editor.org/rfc/rfc9293#section-3.10.7.2
//= type=test
//# Any acknowledgment is bad if it arrives on a connection still in
//# the LISTEN state.  An acceptable reset segment should be formed
#[test]
fn listener_resets_a_stray_ack() {
    let mut endpoint = Endpoint::new();
    let mut listener = connection(test_config());
    listener.bind(&mut endpoint, server_addr()).unwrap();
    listener.listen(Box::new(child_resources)).unwrap();

    let mut header = Header::new(5555, 8080);
    header.flags = Flags::ACK;
    header.seq = SeqNumber::new(100);
    header.ack = SeqNumber::new(900);
    listener.on_segment(
        Segment::new(header, bytes::Bytes::new()),
        ExplicitCongestionNotification::NotEct,
        "127.0.0.1:5555".parse().unwrap(),
        testing::now(),
    );

    let out = drain(&mut listener);
    assert_eq!(out.len(), 1);
    let rst = &out[0].segment.header;
    assert!(rst.flags.contains(Flags::RST));
    assert_eq!(rst.seq, SeqNumber::new(900));
    assert_eq!(listener.state(), &State::Listen);
}

#[test]
fn connection_refused() {
    let clock = testing::Clock::default();
    let mut endpoint = Endpoint::new();

    let client_events = Rc::new(RefCell::new(RecordedEvents::default()));
    let mut client = connection_with_events(test_config(), Box::new(client_events.clone()));
    client
        .connect(&mut endpoint, server_addr(), clock.get_time())
        .unwrap();

    // nobody is listening at the destination
    let mut closed = connection(test_config());
    deliver_all(&mut client, &mut closed, clock.get_time());

    let mut refusal = drain(&mut closed);
    assert_eq!(refusal.len(), 1);
    assert!(refusal[0].segment.header.flags.contains(Flags::RST));

    deliver(&mut client, refusal.remove(0), server_addr(), clock.get_time());
    assert_eq!(client.state(), &State::Closed);
    assert_eq!(client_events.borrow().failed, 1);
    assert_eq!(client_events.borrow().last_error, Some(Error::Reset));
    assert_eq!(client_events.borrow().last_state, Some(State::Closed));
    assert_eq!(client.next_timeout(), None);
}
