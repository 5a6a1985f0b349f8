// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection teardown: the close sequences of RFC 9293 section 3.6

mod common;

use bytes::Bytes;
use common::*;
use tern_tcp::connection::State;
use tern_tcp_core::time::{Clock as _, Duration};

#[test]
fn active_close_through_time_wait() {
    let (mut client, mut server, clock) = established_pair(test_config());
    let now = clock.get_time();

    client.close(now).unwrap();
    assert_eq!(client.state(), &State::FinWait1);

    // FIN reaches the peer
    deliver_all(&mut client, &mut server, now);
    assert_eq!(server.state(), &State::CloseWait);

    // its ack moves us along
    deliver_all(&mut server, &mut client, now);
    assert_eq!(client.state(), &State::FinWait2);

    // the peer closes in turn
    server.close(now).unwrap();
    assert_eq!(server.state(), &State::LastAck);
    deliver_all(&mut server, &mut client, now);
    assert_eq!(client.state(), &State::TimeWait);

    // the final ack releases the passive side immediately
    deliver_all(&mut client, &mut server, now);
    assert_eq!(server.state(), &State::Closed);
    assert_eq!(server.next_timeout(), None);

    //= https://www.rfc-editor.org/rfc/rfc9293#section-3.6.1
    //= type=test
    //# When a connection is closed actively, it MUST linger in the
    //# TIME-WAIT state for a time 2xMSL
    let deadline = client.next_timeout().expect("time-wait timer armed");
    assert_eq!(deadline, now + 2 * Duration::from_secs(120));

    // a moment before the deadline nothing happens
    let early = deadline - Duration::from_millis(1);
    clock.advance_to(early);
    client.on_timeout(early);
    assert_eq!(client.state(), &State::TimeWait);

    clock.advance_to(deadline);
    client.on_timeout(deadline);
    assert_eq!(client.state(), &State::Closed);
    assert_eq!(client.next_timeout(), None);
}

#[test]
fn close_is_idempotent() {
    let (mut client, _server, clock) = established_pair(test_config());
    let now = clock.get_time();

    client.close(now).unwrap();
    let fins = drain(&mut client);
    assert_eq!(fins.len(), 1);

    // a second close sends nothing and changes nothing
    client.close(now).unwrap();
    assert!(drain(&mut client).is_empty());
    assert_eq!(client.state(), &State::FinWait1);
}

#[test]
fn simultaneous_close() {
    let (mut client, mut server, clock) = established_pair(test_config());
    let now = clock.get_time();

    // both sides close before either FIN is delivered
    client.close(now).unwrap();
    server.close(now).unwrap();
    assert_eq!(client.state(), &State::FinWait1);
    assert_eq!(server.state(), &State::FinWait1);

    pump(&mut client, &mut server, now);
    assert_eq!(client.state(), &State::TimeWait);
    assert_eq!(server.state(), &State::TimeWait);

    // both linger for the full quiet period
    let deadline = client.next_timeout().unwrap();
    clock.advance_to(deadline);
    client.on_timeout(deadline);
    server.on_timeout(deadline);
    assert_eq!(client.state(), &State::Closed);
    assert_eq!(server.state(), &State::Closed);
}

#[test]
fn fin_follows_queued_data() {
    let (mut client, mut server, clock) = established_pair(test_config());
    let now = clock.get_time();

    client.send(Bytes::from(vec![7; MSS]), now).unwrap();
    client.close(now).unwrap();

    let out = drain(&mut client);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].segment.payload.len(), MSS);
    let data_end = out[0].segment.header.seq + MSS;
    assert!(out[1].segment.header.flags.contains(
        tern_tcp_core::wire::Flags::FIN
    ));
    assert_eq!(out[1].segment.header.seq, data_end);

    for transmission in out {
        deliver(
            &mut server,
            transmission,
            client.local_addr().unwrap(),
            now,
        );
    }
    assert_eq!(server.state(), &State::CloseWait);

    // the data is still readable on the passive side
    let received = server.recv(usize::MAX).unwrap();
    assert_eq!(received.len(), MSS);

    // no more sends after close
    assert!(client.send(Bytes::from_static(b"late"), now).is_err());
}

#[test]
fn send_half_close_keeps_the_receive_path_open() {
    let (mut client, mut server, clock) = established_pair(test_config());
    let now = clock.get_time();

    client.shutdown_send(now).unwrap();
    assert_eq!(client.state(), &State::FinWait1);
    pump(&mut client, &mut server, now);
    assert_eq!(client.state(), &State::FinWait2);
    assert_eq!(server.state(), &State::CloseWait);

    // the peer may keep sending; we keep reading
    server.send(Bytes::from(vec![9; MSS]), now).unwrap();
    pump(&mut server, &mut client, now);
    let received = client.recv(usize::MAX).unwrap();
    assert_eq!(received.len(), MSS);
}
