// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel entry points reachable from unprivileged tasks
//! OWNERS: @kernel-team
//! PUBLIC API: KernelApi (implemented by the kernel and by Gated<K, G>), privileged_fn!
//! DEPENDS_ON: gate::{Gated, PrivilegeGate}, types
//! INVARIANTS: Trait method and gated wrapper are expanded from the same table line, under the
//!             same cargo feature; each wrapper is raise / call / reset with no other effect

#![allow(clippy::too_many_arguments)]

use core::ffi::c_void;

#[allow(unused_imports)]
use crate::{
    gate::{Gated, PrivilegeGate},
    types::{
        EventBits, EventGroupHandle, MemoryRegion, NotifyAction, PendedFunction, QueueHandle,
        QueuePosition, QueueSetHandle, SchedulerState, StackDepth, StreamBufferHandle, TaskHandle,
        TaskFunction, TaskHookFunction, TaskParameters, TaskState, TaskStatus, Tick, TimeOut, TimerCallback,
        TimerHandle,
    },
};

/// The wrapped entry points, one line each: required cargo features, then
/// the signature. Expanded by a callback macro so every consumer sees the
/// identical list.
macro_rules! kernel_api_table {
    ($callback:ident) => {
        $callback! {
            // Tasks
            ["dynamic_allocation"] fn task_create(code: TaskFunction, name: &'static str, stack_depth: StackDepth, parameters: *mut c_void, priority: u32) -> Option<TaskHandle>;
            ["static_allocation"] fn task_create_static(code: TaskFunction, name: &'static str, stack_depth: StackDepth, parameters: *mut c_void, priority: u32, stack_buffer: *mut usize, task_buffer: *mut c_void) -> Option<TaskHandle>;
            ["dynamic_allocation"] fn task_create_restricted(params: &TaskParameters<'_>) -> Option<TaskHandle>;
            ["static_allocation"] fn task_create_restricted_static(params: &TaskParameters<'_>) -> Option<TaskHandle>;
            ["task_delete"] fn task_delete(task: Option<TaskHandle>);
            ["task_delay"] fn task_delay(ticks: Tick);
            ["task_delay_until"] fn task_delay_until(previous_wake: &mut Tick, increment: Tick) -> bool;
            ["task_abort_delay"] fn task_abort_delay(task: TaskHandle) -> bool;
            ["task_priority_get"] fn task_priority_get(task: Option<TaskHandle>) -> u32;
            ["task_priority_set"] fn task_priority_set(task: Option<TaskHandle>, priority: u32);
            ["task_get_state"] fn task_get_state(task: TaskHandle) -> TaskState;
            ["trace_facility"] fn task_get_info(task: Option<TaskHandle>, status: &mut TaskStatus, state: TaskState);
            ["task_suspend"] fn task_suspend(task: Option<TaskHandle>);
            ["task_suspend"] fn task_resume(task: TaskHandle);
            [] fn task_suspend_all();
            [] fn task_resume_all() -> bool;
            [] fn task_get_tick_count() -> Tick;
            [] fn task_catch_up_ticks(ticks: Tick) -> bool;
            [] fn task_get_number_of_tasks() -> u32;
            [] fn task_get_name(task: Option<TaskHandle>) -> &'static str;
            ["task_get_handle"] fn task_get_handle(name: &str) -> Option<TaskHandle>;
            ["idle_task_handle"] fn task_get_idle_task_handle() -> TaskHandle;
            ["stack_high_water_mark"] fn task_get_stack_high_water_mark(task: Option<TaskHandle>) -> StackDepth;
            ["stack_high_water_mark2"] fn task_get_stack_high_water_mark2(task: Option<TaskHandle>) -> StackDepth;
            ["current_task_handle"] fn task_get_current_task_handle() -> TaskHandle;
            ["scheduler_state"] fn task_get_scheduler_state() -> SchedulerState;
            ["trace_facility"] fn task_get_system_state(statuses: &mut [TaskStatus], total_run_time: Option<&mut u32>) -> usize;
            ["trace_facility", "stats_formatting", "dynamic_allocation"] fn task_list(buffer: &mut [u8]);
            ["run_time_stats", "stats_formatting", "dynamic_allocation"] fn task_get_run_time_stats(buffer: &mut [u8]);
            ["run_time_stats", "idle_task_handle"] fn task_get_idle_run_time_counter() -> u32;
            ["application_task_tag"] fn task_set_application_task_tag(task: Option<TaskHandle>, hook: Option<TaskHookFunction>);
            ["application_task_tag"] fn task_get_application_task_tag(task: Option<TaskHandle>) -> Option<TaskHookFunction>;
            ["application_task_tag"] fn task_call_application_task_hook(task: Option<TaskHandle>, parameter: *mut c_void) -> i32;
            ["thread_local_storage"] fn task_set_thread_local_storage_pointer(task: Option<TaskHandle>, index: usize, value: *mut c_void);
            ["thread_local_storage"] fn task_get_thread_local_storage_pointer(task: Option<TaskHandle>, index: usize) -> *mut c_void;
            [] fn task_set_time_out_state(timeout: &mut TimeOut);
            [] fn task_check_for_time_out(timeout: &mut TimeOut, ticks_to_wait: &mut Tick) -> bool;
            [] fn task_allocate_mpu_regions(task: Option<TaskHandle>, regions: &[MemoryRegion]);
            ["task_notifications"] fn task_generic_notify(task: TaskHandle, index: usize, value: u32, action: NotifyAction, previous: Option<&mut u32>) -> bool;
            ["task_notifications"] fn task_generic_notify_wait(index: usize, clear_on_entry: u32, clear_on_exit: u32, value: Option<&mut u32>, ticks: Tick) -> bool;
            ["task_notifications"] fn task_generic_notify_take(index: usize, clear_on_exit: bool, ticks: Tick) -> u32;
            ["task_notifications"] fn task_generic_notify_state_clear(task: Option<TaskHandle>, index: usize) -> bool;
            ["task_notifications"] fn task_generic_notify_value_clear(task: Option<TaskHandle>, index: usize, bits_to_clear: u32) -> u32;

            // Queues, semaphores, mutexes
            ["dynamic_allocation"] fn queue_generic_create(length: u32, item_size: u32, kind: u8) -> Option<QueueHandle>;
            ["static_allocation"] fn queue_generic_create_static(length: u32, item_size: u32, storage: *mut u8, buffer: *mut c_void, kind: u8) -> Option<QueueHandle>;
            [] fn queue_generic_reset(queue: QueueHandle, new_queue: bool) -> bool;
            [] fn queue_generic_send(queue: QueueHandle, item: *const c_void, ticks: Tick, position: QueuePosition) -> bool;
            [] fn queue_receive(queue: QueueHandle, buffer: *mut c_void, ticks: Tick) -> bool;
            [] fn queue_peek(queue: QueueHandle, buffer: *mut c_void, ticks: Tick) -> bool;
            [] fn queue_semaphore_take(queue: QueueHandle, ticks: Tick) -> bool;
            [] fn queue_messages_waiting(queue: QueueHandle) -> u32;
            [] fn queue_spaces_available(queue: QueueHandle) -> u32;
            [] fn queue_delete(queue: QueueHandle);
            ["mutexes", "dynamic_allocation"] fn queue_create_mutex(kind: u8) -> Option<QueueHandle>;
            ["mutexes", "static_allocation"] fn queue_create_mutex_static(kind: u8, buffer: *mut c_void) -> Option<QueueHandle>;
            ["counting_semaphores", "dynamic_allocation"] fn queue_create_counting_semaphore(max_count: u32, initial_count: u32) -> Option<QueueHandle>;
            ["counting_semaphores", "static_allocation"] fn queue_create_counting_semaphore_static(max_count: u32, initial_count: u32, buffer: *mut c_void) -> Option<QueueHandle>;
            ["mutex_holder"] fn queue_get_mutex_holder(semaphore: QueueHandle) -> Option<TaskHandle>;
            ["recursive_mutexes"] fn queue_take_mutex_recursive(mutex: QueueHandle, ticks: Tick) -> bool;
            ["recursive_mutexes"] fn queue_give_mutex_recursive(mutex: QueueHandle) -> bool;
            ["queue_sets", "dynamic_allocation"] fn queue_create_set(length: u32) -> Option<QueueSetHandle>;
            ["queue_sets"] fn queue_select_from_set(set: QueueSetHandle, ticks: Tick) -> Option<QueueHandle>;
            ["queue_sets"] fn queue_add_to_set(member: QueueHandle, set: QueueSetHandle) -> bool;
            ["queue_sets"] fn queue_remove_from_set(member: QueueHandle, set: QueueSetHandle) -> bool;
            ["queue_registry"] fn queue_add_to_registry(queue: QueueHandle, name: &'static str);
            ["queue_registry"] fn queue_unregister_queue(queue: QueueHandle);
            ["queue_registry"] fn queue_get_name(queue: QueueHandle) -> Option<&'static str>;

            // Heap
            ["dynamic_allocation"] fn port_malloc(size: usize) -> *mut c_void;
            ["dynamic_allocation"] fn port_free(block: *mut c_void);
            ["dynamic_allocation"] fn port_get_free_heap_size() -> usize;
            ["dynamic_allocation"] fn port_get_minimum_ever_free_heap_size() -> usize;
            ["dynamic_allocation"] fn port_initialise_blocks();

            // Software timers
            ["timers", "dynamic_allocation"] fn timer_create(name: &'static str, period: Tick, auto_reload: bool, id: *mut c_void, callback: TimerCallback) -> Option<TimerHandle>;
            ["timers", "static_allocation"] fn timer_create_static(name: &'static str, period: Tick, auto_reload: bool, id: *mut c_void, callback: TimerCallback, buffer: *mut c_void) -> Option<TimerHandle>;
            ["timers"] fn timer_get_timer_id(timer: TimerHandle) -> *mut c_void;
            ["timers"] fn timer_set_timer_id(timer: TimerHandle, id: *mut c_void);
            ["timers"] fn timer_is_timer_active(timer: TimerHandle) -> bool;
            ["timers"] fn timer_get_timer_daemon_task_handle() -> TaskHandle;
            ["pend_function_call"] fn timer_pend_function_call(function: PendedFunction, parameter: *mut c_void, parameter2: u32, ticks: Tick) -> bool;
            ["timers"] fn timer_get_name(timer: TimerHandle) -> &'static str;
            ["timers"] fn timer_set_reload_mode(timer: TimerHandle, auto_reload: bool);
            ["timers"] fn timer_get_reload_mode(timer: TimerHandle) -> bool;
            ["timers"] fn timer_get_period(timer: TimerHandle) -> Tick;
            ["timers"] fn timer_get_expiry_time(timer: TimerHandle) -> Tick;
            ["timers"] fn timer_generic_command(timer: TimerHandle, command: i32, value: Tick, higher_priority_woken: Option<&mut bool>, ticks: Tick) -> bool;

            // Event groups
            ["dynamic_allocation"] fn event_group_create() -> Option<EventGroupHandle>;
            ["static_allocation"] fn event_group_create_static(buffer: *mut c_void) -> Option<EventGroupHandle>;
            [] fn event_group_wait_bits(group: EventGroupHandle, bits: EventBits, clear_on_exit: bool, wait_for_all: bool, ticks: Tick) -> EventBits;
            [] fn event_group_clear_bits(group: EventGroupHandle, bits: EventBits) -> EventBits;
            [] fn event_group_set_bits(group: EventGroupHandle, bits: EventBits) -> EventBits;
            [] fn event_group_sync(group: EventGroupHandle, set: EventBits, wait_for: EventBits, ticks: Tick) -> EventBits;
            [] fn event_group_delete(group: EventGroupHandle);

            // Stream and message buffers
            ["dynamic_allocation"] fn stream_buffer_generic_create(size: usize, trigger_level: usize, is_message_buffer: bool) -> Option<StreamBufferHandle>;
            ["static_allocation"] fn stream_buffer_generic_create_static(size: usize, trigger_level: usize, is_message_buffer: bool, storage: *mut u8, buffer: *mut c_void) -> Option<StreamBufferHandle>;
            [] fn stream_buffer_send(buffer: StreamBufferHandle, data: &[u8], ticks: Tick) -> usize;
            [] fn stream_buffer_receive(buffer: StreamBufferHandle, data: &mut [u8], ticks: Tick) -> usize;
            [] fn stream_buffer_next_message_length_bytes(buffer: StreamBufferHandle) -> usize;
            [] fn stream_buffer_delete(buffer: StreamBufferHandle);
            [] fn stream_buffer_is_full(buffer: StreamBufferHandle) -> bool;
            [] fn stream_buffer_is_empty(buffer: StreamBufferHandle) -> bool;
            [] fn stream_buffer_reset(buffer: StreamBufferHandle) -> bool;
            [] fn stream_buffer_spaces_available(buffer: StreamBufferHandle) -> usize;
            [] fn stream_buffer_bytes_available(buffer: StreamBufferHandle) -> usize;
            [] fn stream_buffer_set_trigger_level(buffer: StreamBufferHandle, trigger_level: usize) -> bool;
        }
    };
}

macro_rules! define_kernel_api {
    ($( [$($feature:literal),*] fn $name:ident($($arg:ident : $ty:ty),*) $(-> $ret:ty)?; )*) => {
        /// Kernel entry points callable from tasks.
        ///
        /// The kernel implements this trait directly; unprivileged tasks use
        /// the [`Gated`] implementation, which brackets each call with the
        /// privilege gate.
        pub trait KernelApi {
            $(
                $(#[cfg(feature = $feature)])*
                fn $name(&mut self $(, $arg: $ty)*) $(-> $ret)?;
            )*
        }

        impl<K: KernelApi, G: PrivilegeGate> KernelApi for Gated<K, G> {
            $(
                $(#[cfg(feature = $feature)])*
                #[inline]
                fn $name(&mut self $(, $arg: $ty)*) $(-> $ret)? {
                    let token = self.gate.raise();
                    let result = self.kernel.$name($($arg),*);
                    self.gate.reset(token);
                    result
                }
            )*
        }
    };
}

kernel_api_table!(define_kernel_api);

/// Defines an application-specific privileged function following the same
/// raise / call / reset template as the kernel wrappers.
///
/// ```ignore
/// privileged_fn! {
///     pub fn read_trim_register(offset: usize) -> u32 => board::read_trim;
/// }
/// // read_trim_register(&gate, 4)
/// ```
#[macro_export]
macro_rules! privileged_fn {
    ($(
        $(#[$meta:meta])*
        $vis:vis fn $name:ident($($arg:ident : $ty:ty),* $(,)?) $(-> $ret:ty)? => $target:path;
    )+) => {
        $(
            $(#[$meta])*
            $vis fn $name<G: $crate::gate::PrivilegeGate>(gate: &G $(, $arg: $ty)*) $(-> $ret)? {
                let token = $crate::gate::PrivilegeGate::raise(gate);
                let result = $target($($arg),*);
                $crate::gate::PrivilegeGate::reset(gate, token);
                result
            }
        )+
    };
}
