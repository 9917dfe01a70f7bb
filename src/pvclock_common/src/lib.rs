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
// Arbitrary (fuzzing) and the simulated hypervisor (std) both need std
#![cfg_attr(not(any(feature = "fuzzing", feature = "std")), no_std)]

/// Memory layouts of the records the hypervisor shares with the guest, and the
/// CPUID leaves and MSRs used to discover and register them.
pub mod abi;

/// The error type for paravirtualized clock operations
pub mod error;

/// Fixed-point `(a * b) >> 32` used to scale TSC deltas to nanoseconds.
pub mod mul;

/// Access to the processor features the clock needs (CPUID, WRMSR, RDTSC).
pub mod platform;

/// Seqlock-protected records living in memory shared with the hypervisor.
///
/// The hypervisor is the only writer of these records, and it may write them
/// at any moment, including while the guest is in the middle of reading. The
/// version counter lets readers detect and retry torn reads without a lock.
pub mod shared;

pub use error::{Error, Result};

/// Nanoseconds per second (1,000,000,000).
pub const NANOS_PER_SEC: u64 = 1_000_000_000;
