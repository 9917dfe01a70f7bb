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

/// A hypervisor stand-in that answers CPUID, records MSR writes, drives the
/// TSC and writes the shared clock records the way KVM does.
pub mod hypervisor;

/// A `log` implementation that keeps every record emitted by the clock crates
/// so tests can assert on them.
pub mod simplelogger;

pub use hypervisor::{MsrWrite, SimulatedHypervisor};
