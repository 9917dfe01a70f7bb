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

use thiserror::Error;

/// The error type for paravirtualized clock operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The hypervisor advertises neither the new nor the legacy KVM clock
    /// MSRs in CPUID leaf `0x4000_0001`. This does not change for the rest of
    /// the boot, so the caller has to pick another clock source.
    #[error("The hypervisor does not provide a KVM paravirtualized clock")]
    Unavailable,
}

pub type Result<T> = core::result::Result<T, Error>;
