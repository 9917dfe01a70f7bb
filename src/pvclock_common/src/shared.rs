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

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicI8, AtomicU8, AtomicU32, AtomicU64, Ordering, fence};

/// A primitive that can sit in hypervisor shared memory.
///
/// Loads and stores go through an atomic view of the memory so that the
/// compiler treats every access as observable: nothing is cached across
/// retries and nothing is merged or torn. Ordering between accesses comes
/// from the explicit fences in [`SharedRecord`], so the accesses themselves
/// are relaxed.
pub trait SharedField: Copy {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and aligned to the size of `Self`.
    unsafe fn load(ptr: *mut Self) -> Self;

    /// # Safety
    ///
    /// `ptr` must be valid for writes and aligned to the size of `Self`.
    unsafe fn store(ptr: *mut Self, value: Self);
}

macro_rules! shared_field {
    ($($ty:ty => $atomic:ty),* $(,)?) => {
        $(
            impl SharedField for $ty {
                #[inline]
                unsafe fn load(ptr: *mut Self) -> Self {
                    // SAFETY: forwarded from the caller
                    unsafe { <$atomic>::from_ptr(ptr) }.load(Ordering::Relaxed)
                }

                #[inline]
                unsafe fn store(ptr: *mut Self, value: Self) {
                    // SAFETY: forwarded from the caller
                    unsafe { <$atomic>::from_ptr(ptr) }.store(value, Ordering::Relaxed)
                }
            }
        )*
    };
}

shared_field!(u8 => AtomicU8, i8 => AtomicI8, u32 => AtomicU32, u64 => AtomicU64);

/// A record protected by a hypervisor-maintained version counter.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` structs whose fields are all naturally
/// aligned relative to a 64-byte aligned base, and must only access the
/// record through [`SharedField`].
pub unsafe trait SharedLayout: Copy {
    /// The record before the hypervisor has written anything.
    const ZERO: Self;

    /// Returns a pointer to the version counter.
    ///
    /// # Safety
    ///
    /// `this` must point to a live record.
    unsafe fn version_ptr(this: *mut Self) -> *mut u32;

    /// Loads every data field into a copy of the record, tagged with `version`.
    ///
    /// # Safety
    ///
    /// `this` must point to a live record.
    unsafe fn load_fields(this: *mut Self, version: u32) -> Self;

    /// Stores every data field of `value`, leaving the version untouched.
    ///
    /// # Safety
    ///
    /// `this` must point to a live record.
    unsafe fn store_fields(this: *mut Self, value: &Self);
}

/// A record shared with the hypervisor.
///
/// The record is 64-byte aligned so that it never straddles a page and every
/// field is naturally aligned on 32-bit targets too. Place it in a `static`:
/// its address is handed to the hypervisor once and must not change.
#[repr(C, align(64))]
pub struct SharedRecord<T> {
    inner: UnsafeCell<T>,
}

// SAFETY: the contents are only ever accessed through atomic loads and stores
// (see `SharedLayout`), so sharing a record between threads cannot race.
unsafe impl<T: SharedLayout + Send> Sync for SharedRecord<T> {}

impl<T: SharedLayout> Default for SharedRecord<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SharedLayout> SharedRecord<T> {
    /// Creates a zeroed record.
    pub const fn new() -> Self {
        Self::with_value(T::ZERO)
    }

    /// Creates a record with the given initial contents.
    pub const fn with_value(value: T) -> Self {
        Self {
            inner: UnsafeCell::new(value),
        }
    }

    pub fn as_ptr(&self) -> *mut T {
        self.inner.get()
    }

    /// Address of the record in the current address space.
    pub fn address(&self) -> usize {
        self.as_ptr() as usize
    }

    /// Current value of the version counter.
    #[inline]
    pub fn version(&self) -> u32 {
        // SAFETY: the record lives as long as `self`
        unsafe { SharedField::load(T::version_ptr(self.as_ptr())) }
    }

    /// Makes a single attempt at reading the record.
    ///
    /// `body` runs between two full fences on a copy of the record and may
    /// sample other clocks (the TSC) so that they are covered by the same
    /// version check. Returns `None` if the hypervisor was in the middle of an
    /// update (odd version) or completed one while we were reading (version
    /// changed); the result of `body` is discarded in that case.
    #[inline]
    pub fn try_read<R>(&self, body: impl FnOnce(&T) -> R) -> Option<R> {
        let version = self.version();
        fence(Ordering::SeqCst);

        // SAFETY: the record lives as long as `self`
        let snapshot = unsafe { T::load_fields(self.as_ptr(), version) };
        let result = body(&snapshot);

        fence(Ordering::SeqCst);
        let after = self.version();

        if after & 1 != 0 || after != version {
            return None;
        }
        Some(result)
    }

    /// Reads the record, retrying until a consistent copy is observed.
    ///
    /// This spins rather than yielding; the hypervisor finishes an update in
    /// a handful of instructions.
    #[inline]
    pub fn read<R>(&self, mut body: impl FnMut(&T) -> R) -> R {
        loop {
            if let Some(result) = self.try_read(&mut body) {
                return result;
            }
            spin_loop();
        }
    }

    /// Like [`read`](Self::read), but gives up after `max_attempts` torn reads.
    pub fn read_bounded<R>(&self, max_attempts: u32, mut body: impl FnMut(&T) -> R) -> Option<R> {
        for _ in 0..max_attempts {
            if let Some(result) = self.try_read(&mut body) {
                return Some(result);
            }
            spin_loop();
        }
        None
    }

    /// Returns a consistent copy of the record.
    pub fn snapshot(&self) -> T {
        self.read(|record| *record)
    }

    /// Starts an update, making the version odd until the returned writer is
    /// dropped.
    ///
    /// This is the hypervisor's side of the protocol. Only one writer may be
    /// active at a time.
    pub fn write(&self) -> RecordWriter<'_, T> {
        let version = self.version() | 1;
        // SAFETY: the record lives as long as `self`
        unsafe { SharedField::store(T::version_ptr(self.as_ptr()), version) };
        fence(Ordering::SeqCst);
        RecordWriter {
            record: self,
            version,
        }
    }

    /// Replaces the data fields of the record in a single update.
    pub fn publish(&self, value: &T) {
        self.write().store(value);
    }
}

/// An in-progress update of a [`SharedRecord`].
///
/// Readers retry for as long as this exists. Dropping it publishes the update.
pub struct RecordWriter<'a, T: SharedLayout> {
    record: &'a SharedRecord<T>,
    version: u32,
}

impl<T: SharedLayout> RecordWriter<'_, T> {
    /// Stores the data fields of `value`; its `version` field is ignored.
    pub fn store(&self, value: &T) {
        // SAFETY: the record outlives the writer
        unsafe { T::store_fields(self.record.as_ptr(), value) };
    }
}

impl<T: SharedLayout> Drop for RecordWriter<'_, T> {
    fn drop(&mut self) {
        fence(Ordering::SeqCst);
        let version = self.version.wrapping_add(1);
        // SAFETY: the record outlives the writer
        unsafe { SharedField::store(T::version_ptr(self.record.as_ptr()), version) };
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use std::thread;
    use std::time::Duration;
    use std::vec::Vec;

    use super::*;
    use crate::abi::{PvclockVcpuTimeInfo, PvclockWallClock};

    fn wall_clock(sec: u32, nsec: u32) -> PvclockWallClock {
        PvclockWallClock {
            version: 0,
            sec,
            nsec,
        }
    }

    #[test]
    fn test_record_alignment() {
        assert_eq!(core::mem::align_of::<SharedRecord<PvclockWallClock>>(), 64);
        let record = SharedRecord::<PvclockVcpuTimeInfo>::new();
        assert_eq!(record.address() % 64, 0);
        assert_eq!(record.address(), record.as_ptr() as usize);
    }

    #[test]
    fn test_new_record_is_zero() {
        let record = SharedRecord::<PvclockVcpuTimeInfo>::new();
        assert_eq!(record.version(), 0);
        assert_eq!(record.snapshot(), PvclockVcpuTimeInfo::ZERO);
    }

    #[test]
    fn test_publish_bumps_version_twice() {
        let record = SharedRecord::<PvclockWallClock>::new();
        record.publish(&wall_clock(10, 20));
        assert_eq!(record.version(), 2);
        record.publish(&wall_clock(30, 40));
        assert_eq!(record.version(), 4);

        let snapshot = record.snapshot();
        assert_eq!(snapshot.version, 4);
        assert_eq!((snapshot.sec, snapshot.nsec), (30, 40));
    }

    #[test]
    fn test_publish_ignores_value_version() {
        let record = SharedRecord::<PvclockWallClock>::new();
        record.publish(&PvclockWallClock {
            version: 7,
            sec: 1,
            nsec: 2,
        });
        assert_eq!(record.version(), 2);
    }

    #[test]
    fn test_version_wraps_to_even() {
        let record = SharedRecord::with_value(PvclockWallClock {
            version: u32::MAX - 1,
            sec: 0,
            nsec: 0,
        });
        record.publish(&wall_clock(1, 1));
        assert_eq!(record.version(), 0);
        assert_eq!(record.snapshot().sec, 1);
    }

    #[test]
    fn test_try_read_during_update() {
        let record = SharedRecord::<PvclockWallClock>::new();
        let writer = record.write();
        assert_eq!(record.version(), 1);
        assert_eq!(record.try_read(|wc| wc.sec), None);

        writer.store(&wall_clock(5, 6));
        assert_eq!(record.try_read(|wc| wc.sec), None);

        drop(writer);
        assert_eq!(record.try_read(|wc| (wc.sec, wc.nsec)), Some((5, 6)));
    }

    #[test]
    fn test_try_read_detects_completed_update() {
        let record = SharedRecord::<PvclockWallClock>::new();
        // The update lands entirely between the two version checks.
        let result = record.try_read(|wc| {
            record.publish(&wall_clock(1, 2));
            wc.sec
        });
        assert_eq!(result, None);
        assert_eq!(record.try_read(|wc| wc.sec), Some(1));
    }

    #[test]
    fn test_stale_odd_version() {
        let record = SharedRecord::with_value(PvclockWallClock {
            version: 3,
            sec: 9,
            nsec: 9,
        });
        assert_eq!(record.try_read(|wc| wc.sec), None);
        assert_eq!(record.read_bounded(4, |wc| wc.sec), None);

        // A writer starting from an odd version still finishes on an even one.
        record.publish(&wall_clock(1, 1));
        assert_eq!(record.version(), 4);
        assert_eq!(record.read_bounded(1, |wc| wc.sec), Some(1));
    }

    #[test]
    fn test_read_bounded_gives_up() {
        let record = SharedRecord::<PvclockWallClock>::new();
        let _writer = record.write();
        let mut attempts = 0;
        let result = record.read_bounded(3, |wc| {
            attempts += 1;
            wc.sec
        });
        assert_eq!(result, None);
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_reader_waits_for_odd_version() {
        let record = Arc::new(SharedRecord::<PvclockWallClock>::new());
        record.publish(&wall_clock(1, 1));

        let writer = record.write();
        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let record = Arc::clone(&record);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let value = record.read(|wc| (wc.sec, wc.nsec));
                done.store(true, Ordering::SeqCst);
                value
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));

        writer.store(&wall_clock(2, 2));
        drop(writer);

        assert_eq!(reader.join().unwrap(), (2, 2));
    }

    #[test]
    fn test_concurrent_reads_are_never_torn() {
        const UPDATES: u32 = 20_000;

        let record = Arc::new(SharedRecord::<PvclockVcpuTimeInfo>::new());
        let last = Arc::new(AtomicU32::new(0));

        // Every update keeps all fields derived from the same counter, so a
        // read mixing two updates breaks the relation.
        let writer = {
            let record = Arc::clone(&record);
            let last = Arc::clone(&last);
            thread::spawn(move || {
                for i in 1..=UPDATES {
                    record.publish(&PvclockVcpuTimeInfo {
                        tsc_timestamp: u64::from(i) << 20,
                        system_time: u64::from(i) * 3,
                        tsc_to_system_mul: i,
                        tsc_shift: (i % 64) as i8,
                        flags: (i % 4) as u8,
                        ..PvclockVcpuTimeInfo::ZERO
                    });
                    last.store(i, Ordering::Release);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let record = Arc::clone(&record);
                let last = Arc::clone(&last);
                thread::spawn(move || {
                    let mut previous = 0;
                    while last.load(Ordering::Acquire) < UPDATES {
                        let info = record.snapshot();
                        let i = info.tsc_to_system_mul;
                        assert_eq!(info.tsc_timestamp, u64::from(i) << 20);
                        assert_eq!(info.system_time, u64::from(i) * 3);
                        assert_eq!(info.tsc_shift, (i % 64) as i8);
                        assert_eq!(info.flags, (i % 4) as u8);
                        assert_eq!(info.version, i * 2);
                        assert!(i >= previous, "went back from {previous} to {i}");
                        previous = i;
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
