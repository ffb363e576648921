// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Newtypes shared by the gate, the timer and the kernel entry points
//! OWNERS: @kernel-team
//! PUBLIC API: HartId, Tick, StackDepth, *Handle, kernel value types used in gated signatures
//! INVARIANTS: Handles are opaque to the port; only the kernel mints them

use core::{ffi::c_void, fmt};

/// Kernel tick count (RV32 port: one machine word, reads are atomic).
pub type Tick = u32;

/// Block forever.
pub const MAX_DELAY: Tick = Tick::MAX;

/// Stack depth in machine words.
pub type StackDepth = u32;

/// Task entry point as seen by the kernel.
pub type TaskFunction = extern "C" fn(*mut c_void);

/// Application hook attached to a task via its tag.
pub type TaskHookFunction = extern "C" fn(*mut c_void) -> i32;

/// Function deferred to the timer service task.
pub type PendedFunction = extern "C" fn(*mut c_void, u32);

/// Timer expiry callback.
pub type TimerCallback = extern "C" fn(TimerHandle);

/// Hardware hart identifier as reported by `mhartid`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct HartId(u16);

impl HartId {
    pub const BOOT: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

macro_rules! kernel_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Wraps a kernel object address.
            #[inline]
            pub const fn from_raw(raw: usize) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn as_raw(self) -> usize {
                self.0
            }
        }
    };
}

kernel_handle!(
    /// Task control block reference.
    TaskHandle
);
kernel_handle!(
    /// Queue, semaphore or mutex.
    QueueHandle
);
kernel_handle!(
    /// Queue set.
    QueueSetHandle
);
kernel_handle!(
    /// Software timer.
    TimerHandle
);
kernel_handle!(
    /// Event group.
    EventGroupHandle
);
kernel_handle!(
    /// Stream or message buffer.
    StreamBufferHandle
);

/// Bits of an event group.
pub type EventBits = u32;

/// Scheduler-visible task state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running = 0,
    Ready = 1,
    Blocked = 2,
    Suspended = 3,
    Deleted = 4,
    Invalid = 5,
}

/// Where a queue send places the item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    Back = 0,
    Front = 1,
    Overwrite = 2,
}

/// Action applied to the notification value by a notify call.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAction {
    NoAction = 0,
    SetBits = 1,
    Increment = 2,
    SetValueWithOverwrite = 3,
    SetValueWithoutOverwrite = 4,
}

/// Scheduler state as reported by the kernel.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Suspended = 0,
    NotStarted = 1,
    Running = 2,
}

/// Snapshot used by the timeout helpers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeOut {
    pub overflow_count: u32,
    pub time_on_entering: Tick,
}

/// Per-task information returned by the trace facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStatus {
    pub handle: TaskHandle,
    pub task_number: u32,
    pub state: TaskState,
    pub current_priority: u32,
    pub base_priority: u32,
    pub run_time_counter: u32,
    pub stack_high_water_mark: StackDepth,
}

/// Caller-configurable protection region requested at task creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: usize,
    pub length: usize,
    pub permissions: crate::mpu::RegionPermissions,
}

/// Definition handed to the restricted task constructors.
#[derive(Debug, Clone, Copy)]
pub struct TaskParameters<'a> {
    pub code: TaskFunction,
    pub name: &'a str,
    pub stack_depth: StackDepth,
    pub parameters: *mut c_void,
    pub priority: u32,
    pub stack_buffer: *mut usize,
    pub regions: &'a [MemoryRegion],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_roundtrip_raw_address() {
        let task = TaskHandle::from_raw(0x8000_1000);
        assert_eq!(task.as_raw(), 0x8000_1000);
        assert_ne!(QueueHandle::from_raw(1), QueueHandle::from_raw(2));
    }

    #[test]
    fn hart_index_matches_raw() {
        let hart = HartId::from_raw(3);
        assert_eq!(hart.as_index(), 3);
        assert_eq!(HartId::BOOT.as_raw(), 0);
    }
}
