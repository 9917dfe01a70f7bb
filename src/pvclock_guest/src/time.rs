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

use pvclock_common::abi::{ClockAbi, PvclockVcpuTimeInfo, PvclockWallClock};
use pvclock_common::shared::SharedRecord;

use crate::arch::HardwarePlatform;
use crate::clock::PvClock;

static TIME_INFO: SharedRecord<PvclockVcpuTimeInfo> = SharedRecord::new();
static WALL_CLOCK: SharedRecord<PvclockWallClock> = SharedRecord::new();

// SAFETY: the only privileged instruction, wrmsr, is issued from
// `initialize`, whose caller guarantees CPL0.
static CLOCK: PvClock<'static, HardwarePlatform> =
    PvClock::new(unsafe { HardwarePlatform::new() }, &TIME_INFO, &WALL_CLOCK);

/// Registers the process-wide clock with the hypervisor.
///
/// Must be called once, before the other functions of this module, on the
/// boot processor. Calls after a successful one do nothing.
///
/// # Safety
///
/// The caller must run at privilege level 0, and the kernel's static data
/// must be identity mapped, since the records' addresses are handed to the
/// hypervisor as guest physical addresses.
pub unsafe fn initialize() -> crate::Result<()> {
    CLOCK.initialize()
}

/// Returns true if [`initialize`] succeeded.
pub fn is_clock_available() -> bool {
    CLOCK.is_available()
}

/// Which MSR pair the clock was registered with, if any.
pub fn clock_abi() -> Option<ClockAbi> {
    CLOCK.abi()
}

/// Returns true if the hypervisor reports a stable TSC.
pub fn is_tsc_stable() -> bool {
    CLOCK.is_tsc_stable()
}

/// Nanoseconds since the hypervisor's reference point. Returns 0 before
/// [`initialize`].
#[inline]
pub fn monotonic_time_ns() -> u64 {
    CLOCK.monotonic_time_ns()
}

pub fn monotonic_time_us() -> u64 {
    CLOCK.monotonic_time_us()
}

/// Wall clock time at which [`monotonic_time_ns`] read zero, captured by
/// [`initialize`]. Returns 0 before that.
pub fn epoch_offset_ns() -> u64 {
    CLOCK.epoch_offset_ns()
}

/// Nanoseconds since the Unix epoch.
pub fn wall_clock_time_ns() -> u64 {
    CLOCK.wall_clock_time_ns()
}

/// Seconds and nanoseconds since the Unix epoch.
pub fn wall_clock_time() -> (u64, u32) {
    CLOCK.wall_clock_time()
}
