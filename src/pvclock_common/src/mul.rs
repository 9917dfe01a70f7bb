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

//! The scaled multiply turns a TSC delta into a nanosecond delta using the
//! 32.32 fixed-point factor published by the hypervisor.
//!
//! Both strategies are always compiled so they can be checked against each
//! other on any host; [`scaled_mul`] is the one suited to the target.

/// Widening 64x64->128 multiply, for targets with a native 64-bit multiplier.
#[path = "arch/amd64/mul.rs"]
pub mod wide;

/// 32x32->64 partial products, for targets limited to a 32-bit multiplier.
#[path = "arch/i686/mul.rs"]
pub mod partial;

#[cfg(target_pointer_width = "64")]
pub use wide::scaled_mul;

#[cfg(not(target_pointer_width = "64"))]
pub use partial::scaled_mul;
