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

#[cfg(target_arch = "x86")]
use core::arch::x86::__cpuid;
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::__cpuid;

use pvclock_common::platform::{CpuidResult, Platform, split_msr_value};

/// Executes `cpuid`, `wrmsr` and `rdtsc` on the current processor.
///
/// Addresses are passed to the hypervisor as-is, so the records must live in
/// identity mapped memory.
#[derive(Debug)]
pub struct HardwarePlatform {
    _private: (),
}

impl HardwarePlatform {
    /// # Safety
    ///
    /// The caller must run at privilege level 0, since `wrmsr` faults
    /// anywhere else, and virtual addresses must equal guest physical ones.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Platform for HardwarePlatform {
    #[inline]
    fn cpuid(&self, leaf: u32) -> CpuidResult {
        // SAFETY: cpuid is available on every processor this crate targets
        #[allow(unused_unsafe)]
        let result = unsafe { __cpuid(leaf) };
        CpuidResult {
            eax: result.eax,
            ebx: result.ebx,
            ecx: result.ecx,
            edx: result.edx,
        }
    }

    fn write_msr(&self, msr: u32, value: u64) {
        let (low, high) = split_msr_value(value);
        // SAFETY: construction guarantees CPL0. The values written are the
        // addresses of records that outlive the registration.
        unsafe {
            core::arch::asm!(
                "wrmsr",
                in("ecx") msr,
                in("eax") low,
                in("edx") high,
                options(nostack, preserves_flags)
            );
        }
    }

    #[inline]
    fn read_tsc(&self) -> u64 {
        let lo: u32;
        let hi: u32;
        // SAFETY: rdtsc is always available on x86. It is not marked nomem so
        // it stays between the fences of the surrounding record read.
        unsafe {
            core::arch::asm!(
                "rdtsc",
                out("eax") lo,
                out("edx") hi,
                options(nostack, preserves_flags)
            );
        }
        ((hi as u64) << 32) | (lo as u64)
    }
}
