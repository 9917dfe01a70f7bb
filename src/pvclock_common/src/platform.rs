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

/// The four registers returned by the `cpuid` instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Processor primitives used to discover, register and read the clock.
///
/// Guests running on hardware use the real instructions; tests substitute a
/// simulated hypervisor.
pub trait Platform {
    /// Executes `cpuid` for `leaf` (sub-leaf 0).
    fn cpuid(&self, leaf: u32) -> CpuidResult;

    /// Writes `value` to the model specific register `msr`.
    ///
    /// On x86 the value is passed as two halves, `edx:eax`.
    fn write_msr(&self, msr: u32, value: u64);

    /// Reads the free-running time stamp counter.
    fn read_tsc(&self) -> u64;

    /// Translates the address of a guest object to the guest physical address
    /// the hypervisor expects.
    ///
    /// Defaults to an identity mapping.
    fn physical_address(&self, addr: usize) -> u64 {
        addr as u64
    }
}

impl<P: Platform + ?Sized> Platform for &P {
    #[inline]
    fn cpuid(&self, leaf: u32) -> CpuidResult {
        (**self).cpuid(leaf)
    }

    #[inline]
    fn write_msr(&self, msr: u32, value: u64) {
        (**self).write_msr(msr, value)
    }

    #[inline]
    fn read_tsc(&self) -> u64 {
        (**self).read_tsc()
    }

    #[inline]
    fn physical_address(&self, addr: usize) -> u64 {
        (**self).physical_address(addr)
    }
}

/// Splits a 64-bit MSR value into the `(eax, edx)` halves `wrmsr` takes.
#[inline]
pub const fn split_msr_value(value: u64) -> (u32, u32) {
    (value as u32, (value >> 32) as u32)
}
