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

use std::sync::Mutex;
use std::sync::atomic::{AtomicI8, AtomicU32, AtomicU64, Ordering};

use pvclock_common::abi::{
    KVM_CPUID_FEATURES, KVM_CPUID_SIGNATURE, KVM_SYSTEM_TIME_ENABLE, KvmFeatures,
    MSR_KVM_SYSTEM_TIME, MSR_KVM_SYSTEM_TIME_NEW, MSR_KVM_WALL_CLOCK, MSR_KVM_WALL_CLOCK_NEW,
    PvclockFlags, PvclockVcpuTimeInfo, PvclockWallClock,
};
use pvclock_common::platform::{CpuidResult, Platform};
use pvclock_common::shared::SharedRecord;

/// `"KVMKVMKVM\0\0\0"` as returned in `ebx`, `ecx` and `edx`.
const KVM_SIGNATURE: [u32; 3] = [0x4b4d_564b, 0x564b_4d56, 0x0000_004d];

/// One `wrmsr` issued by the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsrWrite {
    pub msr: u32,
    pub value: u64,
}

/// A single-vCPU hypervisor that owns the writing side of the clock records.
///
/// Like KVM, it fills in the wall clock record when the guest writes the wall
/// clock MSR, and publishes a first time-info update when the guest enables
/// the system time MSR. Afterwards tests drive the records through
/// [`update_time_info`](Self::update_time_info) and the TSC through
/// [`set_tsc`](Self::set_tsc).
pub struct SimulatedHypervisor<'a> {
    time_info: &'a SharedRecord<PvclockVcpuTimeInfo>,
    wall_clock: &'a SharedRecord<PvclockWallClock>,
    features: AtomicU32,
    tsc: AtomicU64,
    boot_wall_clock_ns: AtomicU64,
    tsc_to_system_mul: AtomicU32,
    tsc_shift: AtomicI8,
    msr_writes: Mutex<Vec<MsrWrite>>,
    cpuid_queries: Mutex<Vec<u32>>,
}

impl<'a> SimulatedHypervisor<'a> {
    /// Creates a hypervisor advertising `features` with a 1 GHz TSC.
    pub fn new(
        time_info: &'a SharedRecord<PvclockVcpuTimeInfo>,
        wall_clock: &'a SharedRecord<PvclockWallClock>,
        features: KvmFeatures,
    ) -> Self {
        Self {
            time_info,
            wall_clock,
            features: AtomicU32::new(features.bits()),
            tsc: AtomicU64::new(0),
            boot_wall_clock_ns: AtomicU64::new(0),
            tsc_to_system_mul: AtomicU32::new(1 << 31),
            tsc_shift: AtomicI8::new(1),
            msr_writes: Mutex::new(Vec::new()),
            cpuid_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn set_features(&self, features: KvmFeatures) {
        self.features.store(features.bits(), Ordering::SeqCst);
    }

    /// Sets the scale factor used when the guest enables the system time MSR.
    pub fn set_tsc_scale(&self, tsc_to_system_mul: u32, tsc_shift: i8) {
        self.tsc_to_system_mul
            .store(tsc_to_system_mul, Ordering::SeqCst);
        self.tsc_shift.store(tsc_shift, Ordering::SeqCst);
    }

    /// Sets the wall clock time, in nanoseconds, written to the wall clock
    /// record on registration.
    pub fn set_boot_wall_clock_ns(&self, nanos: u64) {
        self.boot_wall_clock_ns.store(nanos, Ordering::SeqCst);
    }

    pub fn set_tsc(&self, tsc: u64) {
        self.tsc.store(tsc, Ordering::SeqCst);
    }

    pub fn advance_tsc(&self, ticks: u64) {
        // Wrap like the hardware counter.
        let _ = self
            .tsc
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |tsc| {
                Some(tsc.wrapping_add(ticks))
            });
    }

    /// Publishes a new time-info update, following the version protocol.
    pub fn update_time_info(&self, info: &PvclockVcpuTimeInfo) {
        self.time_info.publish(info);
    }

    /// Publishes a new wall clock, as the host does after a migration.
    pub fn update_wall_clock(&self, nanos: u64) {
        self.wall_clock.publish(&PvclockWallClock::from_nanos(nanos));
    }

    /// Every MSR write so far, oldest first.
    pub fn msr_writes(&self) -> Vec<MsrWrite> {
        self.msr_writes.lock().unwrap().clone()
    }

    /// Every CPUID leaf queried so far, oldest first.
    pub fn cpuid_queries(&self) -> Vec<u32> {
        self.cpuid_queries.lock().unwrap().clone()
    }

    fn enable_system_time(&self, value: u64) {
        if value & KVM_SYSTEM_TIME_ENABLE == 0 {
            return;
        }
        if value & !KVM_SYSTEM_TIME_ENABLE != self.time_info.address() as u64 {
            return;
        }

        let features = KvmFeatures::from_bits_truncate(self.features.load(Ordering::SeqCst));
        let flags = if features.contains(KvmFeatures::CLOCKSOURCE_STABLE_BIT) {
            PvclockFlags::TSC_STABLE
        } else {
            PvclockFlags::empty()
        };
        self.time_info.publish(&PvclockVcpuTimeInfo {
            tsc_timestamp: self.tsc.load(Ordering::SeqCst),
            system_time: 0,
            tsc_to_system_mul: self.tsc_to_system_mul.load(Ordering::SeqCst),
            tsc_shift: self.tsc_shift.load(Ordering::SeqCst),
            flags: flags.bits(),
            ..PvclockVcpuTimeInfo::ZERO
        });
    }

    fn fill_wall_clock(&self, value: u64) {
        if value != self.wall_clock.address() as u64 {
            return;
        }
        self.update_wall_clock(self.boot_wall_clock_ns.load(Ordering::SeqCst));
    }
}

impl Platform for SimulatedHypervisor<'_> {
    fn cpuid(&self, leaf: u32) -> CpuidResult {
        self.cpuid_queries.lock().unwrap().push(leaf);
        match leaf {
            KVM_CPUID_SIGNATURE => CpuidResult {
                eax: KVM_CPUID_FEATURES,
                ebx: KVM_SIGNATURE[0],
                ecx: KVM_SIGNATURE[1],
                edx: KVM_SIGNATURE[2],
            },
            KVM_CPUID_FEATURES => CpuidResult {
                eax: self.features.load(Ordering::SeqCst),
                ..CpuidResult::default()
            },
            _ => CpuidResult::default(),
        }
    }

    fn write_msr(&self, msr: u32, value: u64) {
        self.msr_writes
            .lock()
            .unwrap()
            .push(MsrWrite { msr, value });

        let features = KvmFeatures::from_bits_truncate(self.features.load(Ordering::SeqCst));
        match msr {
            MSR_KVM_SYSTEM_TIME_NEW if features.contains(KvmFeatures::CLOCKSOURCE2) => {
                self.enable_system_time(value)
            }
            MSR_KVM_SYSTEM_TIME if features.contains(KvmFeatures::CLOCKSOURCE) => {
                self.enable_system_time(value)
            }
            MSR_KVM_WALL_CLOCK_NEW if features.contains(KvmFeatures::CLOCKSOURCE2) => {
                self.fill_wall_clock(value)
            }
            MSR_KVM_WALL_CLOCK if features.contains(KvmFeatures::CLOCKSOURCE) => {
                self.fill_wall_clock(value)
            }
            _ => {}
        }
    }

    fn read_tsc(&self) -> u64 {
        self.tsc.load(Ordering::SeqCst)
    }
}
