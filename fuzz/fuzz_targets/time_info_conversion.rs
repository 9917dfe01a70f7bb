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
use pvclock_common::abi::PvclockVcpuTimeInfo;
use pvclock_common::shared::SharedRecord;

// Any record the host may write converts without panicking, and reading it
// back through the version protocol gives the same result as converting the
// value directly.
fuzz_target!(|data: (PvclockVcpuTimeInfo, u64)| {
    let (info, tsc) = data;
    let direct = info.nanos_at(tsc);

    let record = SharedRecord::new();
    record.publish(&info);
    assert_eq!(record.read(|stored| stored.nanos_at(tsc)), direct);
    assert_eq!(record.version(), 2);
});
