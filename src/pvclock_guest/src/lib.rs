/*
Copyright 2026  The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
#![no_std]

//! Guest driver for the KVM paravirtualized clock.
//!
//! The guest allocates two records, hands their addresses to the hypervisor
//! through MSRs, and from then on reads host-synchronized time out of them
//! without exiting to the hypervisor:
//!
//! - the per-vCPU time info record gives a monotonic nanosecond clock,
//! - the wall clock record gives the wall clock time at which that monotonic
//!   clock was zero. It is read once, at initialization.
//!
//! # Usage
//!
//! ```ignore
//! // Once, at boot, before any other clock function is used.
//! // SAFETY: running at CPL0 with identity mapped kernel data.
//! if unsafe { pvclock_guest::initialize() }.is_err() {
//!     // fall back to another clock source
//! }
//!
//! let now = pvclock_guest::monotonic_time_ns();
//! let wall = pvclock_guest::epoch_offset_ns() + now;
//! ```

/// Processor primitives backed by the real instructions.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod arch;

/// The clock bound to a platform and a pair of shared records.
pub mod clock;

/// Process-wide clock backed by statically allocated records.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod time;

pub use clock::{PvClock, Registration};
pub use pvclock_common::abi::ClockAbi;
pub use pvclock_common::{Error, Result};
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use time::{
    clock_abi, epoch_offset_ns, initialize, is_clock_available, is_tsc_stable,
    monotonic_time_ns, monotonic_time_us, wall_clock_time, wall_clock_time_ns,
};
