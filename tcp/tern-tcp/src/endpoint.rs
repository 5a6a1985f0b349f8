// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Local endpoint bookkeeping
//!
//! Tracks which local addresses are bound and hands out ephemeral ports
//! for outgoing connections. Addressing itself (routing, interfaces) is
//! the IP layer's concern; this only guarantees local uniqueness.

use crate::error::Error;
use core::net::{IpAddr, Ipv4Addr, SocketAddr};
use hashbrown::HashSet;

const EPHEMERAL_START: u16 = 49152;

/// The set of locally bound addresses
#[derive(Debug)]
pub struct Endpoint {
    bound: HashSet<SocketAddr>,
    next_ephemeral: u16,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Endpoint {
    pub fn new() -> Self {
        Self {
            bound: HashSet::new(),
            //= https://www.rfc-editor.org/rfc/rfc6335#section-6
            //# the Dynamic Ports, also known as the Private or Ephemeral
            //# Ports, from 49152-65535 (never assigned)
            next_ephemeral: EPHEMERAL_START,
        }
    }

    /// Reserves an explicit local address
    pub fn bind(&mut self, addr: SocketAddr) -> Result<(), Error> {
        if !self.bound.insert(addr) {
            return Err(Error::AddrInUse);
        }
        Ok(())
    }

    /// Allocates an unused ephemeral port on `ip`
    pub fn allocate_ephemeral(&mut self, ip: IpAddr) -> Result<SocketAddr, Error> {
        let span = u16::MAX - EPHEMERAL_START;
        for _ in 0..=span {
            let port = self.next_ephemeral;
            self.next_ephemeral = if port == u16::MAX {
                EPHEMERAL_START
            } else {
                port + 1
            };

            let addr = SocketAddr::new(ip, port);
            if self.bound.insert(addr) {
                return Ok(addr);
            }
        }
        Err(Error::AddrNotAvailable)
    }

    /// Returns a bound address to the pool
    pub fn release(&mut self, addr: SocketAddr) {
        self.bound.remove(&addr);
    }

    pub fn is_bound(&self, addr: SocketAddr) -> bool {
        self.bound.contains(&addr)
    }

    /// A convenience for loopback tests
    pub fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }
}
