// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod buffer;
pub mod congestion;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod rtt;
pub mod seq;
pub mod state;
pub mod time;
pub mod wire;
