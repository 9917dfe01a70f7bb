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

use pvclock_common::abi::{
    ClockAbi, KVM_CPUID_FEATURES, KVM_SYSTEM_TIME_ENABLE, KvmFeatures, PvclockFlags,
    PvclockVcpuTimeInfo, PvclockWallClock,
};
use pvclock_common::platform::Platform;
use pvclock_common::shared::SharedRecord;
use pvclock_common::{Error, NANOS_PER_SEC, Result};
use spin::Once;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// What [`PvClock::initialize`] found and registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// The MSR pair the records were registered with.
    pub abi: ClockAbi,
    /// The clock related feature bits advertised by the hypervisor.
    pub features: KvmFeatures,
    /// Wall clock time, in nanoseconds since the Unix epoch, at which the
    /// monotonic clock read zero.
    pub epoch_offset_ns: u64,
}

/// A paravirtualized clock for a single vCPU.
///
/// The records must stay at the same address for as long as the guest runs,
/// since the hypervisor keeps writing to the address it was given. In a
/// kernel they are `static`s; see [`crate::time`].
///
/// Reads never take a lock and may run concurrently from any number of
/// contexts. [`initialize`](Self::initialize) must complete before the first
/// read for the readings to mean anything: until then the records are zero
/// and every reading is 0.
pub struct PvClock<'a, P> {
    platform: P,
    time_info: &'a SharedRecord<PvclockVcpuTimeInfo>,
    wall_clock: &'a SharedRecord<PvclockWallClock>,
    registration: Once<Registration>,
}

impl<'a, P: Platform> PvClock<'a, P> {
    pub const fn new(
        platform: P,
        time_info: &'a SharedRecord<PvclockVcpuTimeInfo>,
        wall_clock: &'a SharedRecord<PvclockWallClock>,
    ) -> Self {
        Self {
            platform,
            time_info,
            wall_clock,
            registration: Once::new(),
        }
    }

    /// Detects the clock ABI, registers both records with the hypervisor and
    /// captures the epoch offset.
    ///
    /// Returns [`Error::Unavailable`] without touching any MSR if the
    /// hypervisor advertises neither clock ABI. Once registration succeeded,
    /// later calls do nothing.
    #[cfg_attr(feature = "tracing", instrument(skip_all, level = "Trace"))]
    pub fn initialize(&self) -> Result<()> {
        self.registration.try_call_once(|| self.register())?;
        Ok(())
    }

    fn register(&self) -> Result<Registration> {
        let features =
            KvmFeatures::from_bits_truncate(self.platform.cpuid(KVM_CPUID_FEATURES).eax);
        let Some(abi) = ClockAbi::from_features(features) else {
            log::warn!(
                "Hypervisor does not advertise the KVM paravirtualized clock (features {:#x})",
                features.bits()
            );
            return Err(Error::Unavailable);
        };

        log::info!(
            "Initializing the KVM paravirtualized clock: {abi} (system time MSR {:#x}, wall clock MSR {:#x})",
            abi.system_time_msr(),
            abi.wall_clock_msr()
        );

        let time_info =
            self.platform.physical_address(self.time_info.address()) | KVM_SYSTEM_TIME_ENABLE;
        self.platform.write_msr(abi.system_time_msr(), time_info);

        let wall_clock = self.platform.physical_address(self.wall_clock.address());
        self.platform.write_msr(abi.wall_clock_msr(), wall_clock);

        let epoch_offset_ns = self.read_wall_clock_ns();
        log::debug!("KVM clock epoch offset: {epoch_offset_ns}ns");

        Ok(Registration {
            abi,
            features,
            epoch_offset_ns,
        })
    }

    /// Nanoseconds since the hypervisor's reference point.
    ///
    /// Never decreases as long as the host keeps the TSC and its updates
    /// consistent, which it does outside of migration.
    #[inline]
    pub fn monotonic_time_ns(&self) -> u64 {
        self.time_info
            .read(|info| info.nanos_at(self.platform.read_tsc()))
    }

    /// Microseconds since the hypervisor's reference point.
    pub fn monotonic_time_us(&self) -> u64 {
        self.monotonic_time_ns() / 1_000
    }

    /// Like [`monotonic_time_ns`](Self::monotonic_time_ns), but returns `None`
    /// instead of spinning further if the hypervisor was updating the record
    /// during each of `max_attempts` attempts.
    pub fn try_monotonic_time_ns(&self, max_attempts: u32) -> Option<u64> {
        let nanos = self.time_info.read_bounded(max_attempts, |info| {
            info.nanos_at(self.platform.read_tsc())
        });
        if nanos.is_none() {
            log::trace!("pvclock time info still unstable after {max_attempts} attempts");
        }
        nanos
    }

    /// Reads the wall clock record, in nanoseconds since the Unix epoch.
    ///
    /// The host writes this record when the guest registers it, and may
    /// refresh it after a migration. The epoch offset keeps the value read
    /// at initialization.
    pub fn read_wall_clock_ns(&self) -> u64 {
        self.wall_clock.read(PvclockWallClock::as_nanos)
    }

    /// Wall clock time captured at initialization, or 0 if the clock has not
    /// been initialized.
    pub fn epoch_offset_ns(&self) -> u64 {
        self.registration
            .get()
            .map_or(0, |registration| registration.epoch_offset_ns)
    }

    /// Current wall clock time in nanoseconds since the Unix epoch.
    pub fn wall_clock_time_ns(&self) -> u64 {
        self.epoch_offset_ns()
            .wrapping_add(self.monotonic_time_ns())
    }

    /// Current wall clock time as seconds and sub-second nanoseconds since
    /// the Unix epoch, suitable for a `timespec`.
    pub fn wall_clock_time(&self) -> (u64, u32) {
        let nanos = self.wall_clock_time_ns();
        (nanos / NANOS_PER_SEC, (nanos % NANOS_PER_SEC) as u32)
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.registration.get()
    }

    /// Returns true once [`initialize`](Self::initialize) succeeded.
    pub fn is_available(&self) -> bool {
        self.registration.is_completed()
    }

    pub fn abi(&self) -> Option<ClockAbi> {
        self.registration().map(|registration| registration.abi)
    }

    /// Returns true if the hypervisor guarantees a stable TSC, both through
    /// CPUID and in the time info record.
    pub fn is_tsc_stable(&self) -> bool {
        let Some(registration) = self.registration() else {
            return false;
        };
        registration
            .features
            .contains(KvmFeatures::CLOCKSOURCE_STABLE_BIT)
            && self
                .time_info
                .read(|info| info.flags().contains(PvclockFlags::TSC_STABLE))
    }
}
