// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! ECN negotiation and the congestion-echo exchange over the pipe

mod common;

use bytes::Bytes;
use common::*;
use tern_tcp::{config::EcnMode, connection::State, endpoint::Endpoint};
use tern_tcp_core::{
    time::{clock::testing, Clock as _},
    wire::{ExplicitCongestionNotification, Flags},
};

//= https://www.rfc-editor.org/rfc/rfc3168#section-6.1.1
//= type=test
//# the ECN-setup SYN packet, [...] with the ECE and CWR flags set
#[test]
fn negotiation_on_the_handshake() {
    let config = test_config().with_ecn(EcnMode::On).unwrap();
    let clock = testing::Clock::default();
    let mut endpoint = Endpoint::new();

    let mut listener = connection(config);
    listener.bind(&mut endpoint, server_addr()).unwrap();
    listener.listen(Box::new(child_resources)).unwrap();

    let mut client = connection(config);
    client
        .connect(&mut endpoint, server_addr(), clock.get_time())
        .unwrap();

    let mut syn = drain(&mut client);
    assert!(syn[0]
        .segment
        .header
        .flags
        .contains(Flags::SYN | Flags::ECE | Flags::CWR));

    let client_addr = client.local_addr().unwrap();
    deliver(&mut listener, syn.remove(0), client_addr, clock.get_time());
    let mut server = listener.accept().unwrap();

    let synack = drain(&mut server);
    let flags = synack[0].segment.header.flags;
    assert!(flags.contains(Flags::SYN | Flags::ACK | Flags::ECE));
    assert!(!flags.contains(Flags::CWR));

    for transmission in synack {
        deliver(&mut client, transmission, server_addr(), clock.get_time());
    }
    deliver_all(&mut client, &mut server, clock.get_time());
    assert_eq!(client.state(), &State::Established);
    assert_eq!(server.state(), &State::Established);

    // data goes out ECN-capable
    client
        .send(Bytes::from(vec![0; MSS]), clock.get_time())
        .unwrap();
    let data = drain(&mut client);
    assert_eq!(data[0].ecn, ExplicitCongestionNotification::Ect0);
}

#[test]
fn a_plain_peer_disables_ecn() {
    let requesting = test_config().with_ecn(EcnMode::On).unwrap();
    let plain = test_config();

    let clock = testing::Clock::default();
    let mut endpoint = Endpoint::new();

    let mut listener = connection(plain);
    listener.bind(&mut endpoint, server_addr()).unwrap();
    listener.listen(Box::new(child_resources)).unwrap();

    let mut client = connection(requesting);
    client
        .connect(&mut endpoint, server_addr(), clock.get_time())
        .unwrap();
    deliver_all(&mut client, &mut listener, clock.get_time());
    let mut server = listener.accept().unwrap();

    let synack = drain(&mut server);
    assert!(!synack[0].segment.header.flags.contains(Flags::ECE));
    for transmission in synack {
        deliver(&mut client, transmission, server_addr(), clock.get_time());
    }
    deliver_all(&mut client, &mut server, clock.get_time());

    // the sender falls back to not-ECT
    client
        .send(Bytes::from(vec![0; MSS]), clock.get_time())
        .unwrap();
    let data = drain(&mut client);
    assert_eq!(data[0].ecn, ExplicitCongestionNotification::NotEct);
}

//= https://www.rfc-editor.org/rfc/rfc3168#section-6.1.3
//= type=test
//# If the receiver receives a CE data packet, it MUST set the
//# ECE flag in subsequent ACK packets [...] until it receives a
//# CWR packet
#[test]
fn ce_marking_round_trip() {
    let config = test_config().with_ecn(EcnMode::On).unwrap();
    let (mut client, mut server, clock) = established_pair(config);
    let client_addr = client.local_addr().unwrap();
    let now = clock.get_time();
    let initial_cwnd = client.window().cwnd;

    client.send(Bytes::from(vec![0xce; MSS]), now).unwrap();
    let mut data = drain(&mut client);
    assert_eq!(data[0].ecn, ExplicitCongestionNotification::Ect0);

    // a router marks the segment on the way
    let marked = data.remove(0);
    server.on_segment(
        marked.segment,
        ExplicitCongestionNotification::Ce,
        client_addr,
        now,
    );

    // the echo rides the (delayed) ack
    expire_next(&mut server, &clock);
    let mut acks = drain(&mut server);
    assert_eq!(acks.len(), 1);
    assert!(acks[0].segment.header.flags.contains(Flags::ECE));

    deliver(&mut client, acks.remove(0), server_addr(), clock.get_time());

    // the next data segment reduces the window and carries CWR
    client
        .send(Bytes::from(vec![0xcf; MSS]), clock.get_time())
        .unwrap();
    let mut data = drain(&mut client);
    assert_eq!(data.len(), 1);
    assert!(data[0].segment.header.flags.contains(Flags::CWR));
    assert!(client.window().cwnd < initial_cwnd);
    assert_eq!(client.window().cwnd, client.window().ssthresh);

    // CWR stops the echo
    deliver(&mut server, data.remove(0), client_addr, clock.get_time());
    expire_next(&mut server, &clock);
    let acks = drain(&mut server);
    assert_eq!(acks.len(), 1);
    assert!(!acks[0].segment.header.flags.contains(Flags::ECE));
}
