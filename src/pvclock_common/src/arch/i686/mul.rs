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
/// `(value * scale) >> 32`, without needing a 64-bit multiplier.
///
/// With `value = hi * 2^32 + lo` the product is `hi * scale * 2^32 + lo * scale`.
/// The low 32 bits of `lo * scale` are discarded and its high half is carried
/// into `hi * scale`. The sum is at most `(2^32 - 1) * 2^32`, so it cannot
/// overflow.
#[inline]
pub const fn scaled_mul(value: u64, scale: u32) -> u64 {
    let hi = (value >> 32) as u32;
    let lo = value as u32;

    let lo_product = lo as u64 * scale as u64;
    let hi_product = hi as u64 * scale as u64;

    hi_product + (lo_product >> 32)
}
