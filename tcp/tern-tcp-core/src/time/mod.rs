// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod clock;
mod timer;
mod timestamp;

pub use clock::*;
pub use core::time::Duration;
pub use timer::*;
pub use timestamp::*;
