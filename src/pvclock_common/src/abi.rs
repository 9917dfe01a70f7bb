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

//! Paravirtualized clock structures shared between hypervisor and guest.
//!
//! These structures enable guests to read time without VM exits by using
//! memory that the hypervisor keeps up to date.
//!
//! Reference: Linux kernel `arch/x86/include/asm/pvclock-abi.h` and
//! `Documentation/virt/kvm/x86/msr.rst`.

use core::fmt;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::NANOS_PER_SEC;
use crate::mul::scaled_mul;
use crate::shared::{SharedField, SharedLayout};

/// CPUID leaf holding the hypervisor vendor signature (`"KVMKVMKVM\0\0\0"`).
pub const KVM_CPUID_SIGNATURE: u32 = 0x4000_0000;
/// CPUID leaf whose `eax` holds the [`KvmFeatures`] bits.
pub const KVM_CPUID_FEATURES: u32 = 0x4000_0001;

/// Legacy wall clock MSR.
pub const MSR_KVM_WALL_CLOCK: u32 = 0x11;
/// Legacy system time MSR.
pub const MSR_KVM_SYSTEM_TIME: u32 = 0x12;
/// Wall clock MSR, used when [`KvmFeatures::CLOCKSOURCE2`] is set.
pub const MSR_KVM_WALL_CLOCK_NEW: u32 = 0x4b56_4d00;
/// System time MSR, used when [`KvmFeatures::CLOCKSOURCE2`] is set.
pub const MSR_KVM_SYSTEM_TIME_NEW: u32 = 0x4b56_4d01;

/// Bit 0 of a value written to a system time MSR enables the updates; it is
/// not part of the address.
pub const KVM_SYSTEM_TIME_ENABLE: u64 = 1;

bitflags! {
    /// Feature bits reported in `eax` of [`KVM_CPUID_FEATURES`].
    ///
    /// Only the clock related bits are named, everything else is ignored.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct KvmFeatures: u32 {
        /// The legacy clock MSRs (`0x11`/`0x12`) are available.
        const CLOCKSOURCE = 1 << 0;
        /// The new clock MSRs (`0x4b564d00`/`0x4b564d01`) are available.
        const CLOCKSOURCE2 = 1 << 3;
        /// The host guarantees that the TSC does not go backwards across vCPUs.
        const CLOCKSOURCE_STABLE_BIT = 1 << 24;
    }
}

bitflags! {
    /// The `flags` byte of [`PvclockVcpuTimeInfo`].
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PvclockFlags: u8 {
        /// The TSC is stable and the reading can be trusted across vCPUs.
        const TSC_STABLE = 1 << 0;
        /// The guest was paused by the host (used by watchdogs).
        const GUEST_STOPPED = 1 << 1;
    }
}

/// KVM pvclock per-vCPU time structure (defined by KVM ABI).
///
/// The host writes to this structure, and the guest reads it to compute
/// the current time in nanoseconds. There is no implicit padding: the padding
/// the host expects is spelled out so the layout matches it bit for bit.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub struct PvclockVcpuTimeInfo {
    /// Version counter - odd means update in progress.
    /// Guest must re-read if this changes during read.
    pub version: u32,
    pub pad0: u32,
    /// TSC value when `system_time` was captured.
    pub tsc_timestamp: u64,
    /// System time in nanoseconds at `tsc_timestamp`.
    pub system_time: u64,
    /// Multiplier for TSC -> nanoseconds conversion.
    pub tsc_to_system_mul: u32,
    /// Shift for TSC -> nanoseconds conversion (can be negative).
    pub tsc_shift: i8,
    /// See [`PvclockFlags`].
    pub flags: u8,
    pub pad: [u8; 2],
}

impl PvclockVcpuTimeInfo {
    /// An all-zero record, which is what the guest exposes before the host
    /// ever wrote to it.
    pub const ZERO: Self = Self {
        version: 0,
        pad0: 0,
        tsc_timestamp: 0,
        system_time: 0,
        tsc_to_system_mul: 0,
        tsc_shift: 0,
        flags: 0,
        pad: [0; 2],
    };

    /// Returns the decoded flags byte, ignoring unknown bits.
    pub fn flags(&self) -> PvclockFlags {
        PvclockFlags::from_bits_truncate(self.flags)
    }

    /// Converts a TSC delta to nanoseconds.
    ///
    /// The delta is first shifted by `tsc_shift` (right when negative) and
    /// then multiplied by `tsc_to_system_mul / 2^32`. Shifting by 64 bits or
    /// more yields 0 rather than wrapping the shift amount.
    #[inline]
    pub fn scale_delta(&self, delta: u64) -> u64 {
        let shift = u32::from(self.tsc_shift.unsigned_abs());
        let delta = if self.tsc_shift < 0 {
            delta.checked_shr(shift).unwrap_or(0)
        } else {
            delta.checked_shl(shift).unwrap_or(0)
        };
        scaled_mul(delta, self.tsc_to_system_mul)
    }

    /// Returns the system time in nanoseconds at the given TSC value.
    ///
    /// A TSC value behind `tsc_timestamp` wraps around like the hardware
    /// counter does.
    #[inline]
    pub fn nanos_at(&self, tsc: u64) -> u64 {
        let delta = tsc.wrapping_sub(self.tsc_timestamp);
        self.system_time.wrapping_add(self.scale_delta(delta))
    }
}

/// KVM wall clock structure (defined by KVM ABI).
///
/// Holds the wall clock time at which the host's system time was zero. The
/// host only fills it in when the guest writes the wall clock MSR.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub struct PvclockWallClock {
    /// Version counter, same protocol as [`PvclockVcpuTimeInfo::version`].
    pub version: u32,
    pub sec: u32,
    pub nsec: u32,
}

impl PvclockWallClock {
    pub const ZERO: Self = Self {
        version: 0,
        sec: 0,
        nsec: 0,
    };

    /// Builds a record from a wall clock time in nanoseconds.
    ///
    /// Seconds past `u32::MAX` cannot be represented by the ABI and wrap.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self {
            version: 0,
            sec: (nanos / NANOS_PER_SEC) as u32,
            nsec: (nanos % NANOS_PER_SEC) as u32,
        }
    }

    /// Returns the wall clock time in nanoseconds.
    #[inline]
    pub fn as_nanos(&self) -> u64 {
        u64::from(self.sec) * NANOS_PER_SEC + u64::from(self.nsec)
    }
}

macro_rules! shared_layout {
    ($record:ty { $($field:ident),* $(,)? }) => {
        // SAFETY: `version` is a naturally aligned `u32` inside the record and
        // every listed field is a naturally aligned primitive, so the atomic
        // views created by `SharedField` are valid for any aligned record.
        unsafe impl SharedLayout for $record {
            const ZERO: Self = <$record>::ZERO;

            #[inline]
            unsafe fn version_ptr(this: *mut Self) -> *mut u32 {
                // SAFETY: the caller guarantees `this` points to a live record
                unsafe { &raw mut (*this).version }
            }

            #[inline]
            unsafe fn load_fields(this: *mut Self, version: u32) -> Self {
                // SAFETY: forwarded from the caller
                unsafe {
                    Self {
                        version,
                        $($field: SharedField::load(&raw mut (*this).$field),)*
                        ..Self::ZERO
                    }
                }
            }

            #[inline]
            unsafe fn store_fields(this: *mut Self, value: &Self) {
                // SAFETY: forwarded from the caller
                unsafe {
                    $(SharedField::store(&raw mut (*this).$field, value.$field);)*
                }
            }
        }
    };
}

shared_layout!(PvclockVcpuTimeInfo {
    tsc_timestamp,
    system_time,
    tsc_to_system_mul,
    tsc_shift,
    flags,
});

shared_layout!(PvclockWallClock { sec, nsec });

/// The pair of MSRs a guest uses to register its clock records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockAbi {
    /// MSRs `0x4b564d01` (system time) and `0x4b564d00` (wall clock).
    New,
    /// MSRs `0x12` (system time) and `0x11` (wall clock).
    Legacy,
}

impl ClockAbi {
    /// Picks the ABI advertised by the hypervisor, preferring the new MSRs.
    pub fn from_features(features: KvmFeatures) -> Option<Self> {
        if features.contains(KvmFeatures::CLOCKSOURCE2) {
            Some(Self::New)
        } else if features.contains(KvmFeatures::CLOCKSOURCE) {
            Some(Self::Legacy)
        } else {
            None
        }
    }

    pub const fn system_time_msr(self) -> u32 {
        match self {
            Self::New => MSR_KVM_SYSTEM_TIME_NEW,
            Self::Legacy => MSR_KVM_SYSTEM_TIME,
        }
    }

    pub const fn wall_clock_msr(self) -> u32 {
        match self {
            Self::New => MSR_KVM_WALL_CLOCK_NEW,
            Self::Legacy => MSR_KVM_WALL_CLOCK,
        }
    }
}

impl fmt::Display for ClockAbi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => f.write_str("kvm-clock"),
            Self::Legacy => f.write_str("kvm-clock (legacy MSRs)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use core::mem::{offset_of, size_of};

    use quickcheck::quickcheck;

    use super::*;

    #[test]
    fn test_time_info_layout() {
        // KVM pvclock struct must be exactly 32 bytes
        assert_eq!(size_of::<PvclockVcpuTimeInfo>(), 32);
        assert_eq!(offset_of!(PvclockVcpuTimeInfo, version), 0);
        assert_eq!(offset_of!(PvclockVcpuTimeInfo, pad0), 4);
        assert_eq!(offset_of!(PvclockVcpuTimeInfo, tsc_timestamp), 8);
        assert_eq!(offset_of!(PvclockVcpuTimeInfo, system_time), 16);
        assert_eq!(offset_of!(PvclockVcpuTimeInfo, tsc_to_system_mul), 24);
        assert_eq!(offset_of!(PvclockVcpuTimeInfo, tsc_shift), 28);
        assert_eq!(offset_of!(PvclockVcpuTimeInfo, flags), 29);
        assert_eq!(offset_of!(PvclockVcpuTimeInfo, pad), 30);
    }

    #[test]
    fn test_wall_clock_layout() {
        assert_eq!(size_of::<PvclockWallClock>(), 12);
        assert_eq!(offset_of!(PvclockWallClock, version), 0);
        assert_eq!(offset_of!(PvclockWallClock, sec), 4);
        assert_eq!(offset_of!(PvclockWallClock, nsec), 8);
    }

    #[test]
    fn test_zero_matches_zeroable() {
        assert_eq!(PvclockVcpuTimeInfo::ZERO, PvclockVcpuTimeInfo::zeroed());
        assert_eq!(PvclockWallClock::ZERO, PvclockWallClock::zeroed());
    }

    #[test]
    fn test_time_info_bytes_follow_abi() {
        let info = PvclockVcpuTimeInfo {
            version: 2,
            tsc_timestamp: 0x0102_0304_0506_0708,
            system_time: 0x1112_1314_1516_1718,
            tsc_to_system_mul: 0xa0b0_c0d0,
            tsc_shift: -1,
            flags: PvclockFlags::TSC_STABLE.bits(),
            ..PvclockVcpuTimeInfo::ZERO
        };
        let bytes = bytemuck::bytes_of(&info);
        assert_eq!(&bytes[0..4], &2u32.to_ne_bytes());
        assert_eq!(&bytes[8..16], &0x0102_0304_0506_0708u64.to_ne_bytes());
        assert_eq!(&bytes[16..24], &0x1112_1314_1516_1718u64.to_ne_bytes());
        assert_eq!(&bytes[24..28], &0xa0b0_c0d0u32.to_ne_bytes());
        assert_eq!(bytes[28], 0xff);
        assert_eq!(bytes[29], 0x01);
    }

    #[test]
    fn test_flags_ignore_unknown_bits() {
        let info = PvclockVcpuTimeInfo {
            flags: 0b1000_0011,
            ..PvclockVcpuTimeInfo::ZERO
        };
        assert_eq!(
            info.flags(),
            PvclockFlags::TSC_STABLE | PvclockFlags::GUEST_STOPPED
        );
    }

    #[test]
    fn test_wall_clock_nanos() {
        let wc = PvclockWallClock {
            version: 2,
            sec: 1_700_000_000,
            nsec: 500_000_000,
        };
        assert_eq!(wc.as_nanos(), 1_700_000_000_500_000_000);
        assert_eq!(
            PvclockWallClock::from_nanos(1_700_000_000_500_000_000),
            PvclockWallClock { version: 0, ..wc }
        );
    }

    #[test]
    fn test_wall_clock_max_does_not_overflow() {
        let wc = PvclockWallClock {
            version: 0,
            sec: u32::MAX,
            nsec: 999_999_999,
        };
        assert_eq!(wc.as_nanos(), 4_294_967_295_999_999_999);
    }

    #[test]
    fn test_one_ghz_tsc() {
        // 1 GHz: ns = (delta << 1) * 2^31 / 2^32 = delta
        let info = PvclockVcpuTimeInfo {
            tsc_timestamp: 1000,
            system_time: 5_000_000_000,
            tsc_to_system_mul: 1 << 31,
            tsc_shift: 1,
            ..PvclockVcpuTimeInfo::ZERO
        };
        assert_eq!(info.nanos_at(1000 + 2_000_000_000), 7_000_000_000);
    }

    #[test]
    fn test_unshifted_scale_is_reproducible() {
        let info = PvclockVcpuTimeInfo {
            tsc_timestamp: 1000,
            system_time: 5_000_000_000,
            tsc_to_system_mul: 1 << 2,
            tsc_shift: 0,
            ..PvclockVcpuTimeInfo::ZERO
        };
        // (2e9 * 4) >> 32 == 1
        assert_eq!(info.scale_delta(2_000_000_000), 1);
        assert_eq!(info.nanos_at(1000 + 2_000_000_000), 5_000_000_001);
    }

    #[test]
    fn test_negative_shift() {
        // 4 GHz: a quarter of the ticks, each worth just under 1ns
        let info = PvclockVcpuTimeInfo {
            tsc_to_system_mul: u32::MAX,
            tsc_shift: -2,
            ..PvclockVcpuTimeInfo::ZERO
        };
        assert_eq!(info.scale_delta(4_000_000_000), 999_999_999);
    }

    #[test]
    fn test_full_width_shifts_yield_zero() {
        for shift in [64, 100, 127, -64, -100, -127, i8::MIN] {
            let info = PvclockVcpuTimeInfo {
                tsc_to_system_mul: u32::MAX,
                tsc_shift: shift,
                ..PvclockVcpuTimeInfo::ZERO
            };
            assert_eq!(info.scale_delta(u64::MAX), 0, "shift {shift}");
        }
    }

    #[test]
    fn test_tsc_behind_timestamp_wraps() {
        let info = PvclockVcpuTimeInfo {
            tsc_timestamp: u64::MAX - 9,
            system_time: 1_000,
            tsc_to_system_mul: 1 << 31,
            tsc_shift: 1,
            ..PvclockVcpuTimeInfo::ZERO
        };
        // The counter rolled over: 10 ticks to reach 0, then 5 more.
        assert_eq!(info.nanos_at(5), 1_015);
    }

    #[test]
    fn test_abi_selection() {
        assert_eq!(ClockAbi::from_features(KvmFeatures::empty()), None);
        assert_eq!(
            ClockAbi::from_features(KvmFeatures::CLOCKSOURCE_STABLE_BIT),
            None
        );
        assert_eq!(
            ClockAbi::from_features(KvmFeatures::CLOCKSOURCE),
            Some(ClockAbi::Legacy)
        );
        assert_eq!(
            ClockAbi::from_features(KvmFeatures::CLOCKSOURCE2),
            Some(ClockAbi::New)
        );
        assert_eq!(
            ClockAbi::from_features(KvmFeatures::CLOCKSOURCE | KvmFeatures::CLOCKSOURCE2),
            Some(ClockAbi::New)
        );
    }

    #[test]
    fn test_abi_msrs() {
        assert_eq!(ClockAbi::New.system_time_msr(), 0x4b56_4d01);
        assert_eq!(ClockAbi::New.wall_clock_msr(), 0x4b56_4d00);
        assert_eq!(ClockAbi::Legacy.system_time_msr(), 0x12);
        assert_eq!(ClockAbi::Legacy.wall_clock_msr(), 0x11);
    }

    fn reference_nanos(info: &PvclockVcpuTimeInfo, tsc: u64) -> u64 {
        let delta = tsc.wrapping_sub(info.tsc_timestamp);
        let shifted = if info.tsc_shift < 0 {
            delta >> -i32::from(info.tsc_shift)
        } else {
            (u128::from(delta) << info.tsc_shift) as u64
        };
        let scaled = (u128::from(shifted) * u128::from(info.tsc_to_system_mul)) >> 32;
        (u128::from(info.system_time) + scaled) as u64
    }

    quickcheck! {
        fn prop_nanos_at_matches_reference(
            tsc_timestamp: u64,
            system_time: u64,
            mul: u32,
            shift: i8,
            tsc: u64
        ) -> bool {
            let info = PvclockVcpuTimeInfo {
                tsc_timestamp,
                system_time,
                tsc_to_system_mul: mul,
                tsc_shift: shift % 64,
                ..PvclockVcpuTimeInfo::ZERO
            };
            info.nanos_at(tsc) == reference_nanos(&info, tsc)
        }
    }
}
