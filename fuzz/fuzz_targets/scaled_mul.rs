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

#![no_main]

use libfuzzer_sys::fuzz_target;
use pvclock_common::mul::{partial, wide};

// Both multiply routines must agree on every input, whichever one the
// target ends up using.
fuzz_target!(|data: (u64, u32)| {
    let (value, scale) = data;
    let expected = ((value as u128 * scale as u128) >> 32) as u64;
    assert_eq!(wide::scaled_mul(value, scale), expected);
    assert_eq!(partial::scaled_mul(value, scale), expected);
});
