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

/// Returns the upper 64 bits of the 96-bit product `value * scale`, that is
/// `(value * scale) >> 32`.
///
/// On x86_64 this compiles down to a single `mul` followed by `shrd`.
#[inline]
pub const fn scaled_mul(value: u64, scale: u32) -> u64 {
    ((value as u128 * scale as u128) >> 32) as u64
}
