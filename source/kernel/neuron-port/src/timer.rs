// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-hart scheduler tick arming on the machine timer
//! OWNERS: @kernel-arch-team
//! PUBLIC API: HartTimer, arm(), tick(), next_expiry(), setup_timer_interrupt()
//! DEPENDS_ON: hal::MachineTimer, config::TIMER_INCREMENTS_FOR_ONE_TICK
//! INVARIANTS: next_expiry is one increment ahead of the programmed compare value;
//!             each hart only touches its own table slot

use spin::Mutex;

use crate::{config, hal::MachineTimer, types::HartId};

/// Tick state of one hart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HartTimer {
    hart: HartId,
    increment: u64,
    next_expiry: u64,
}

impl HartTimer {
    /// Programs the first compare value one increment from now.
    ///
    /// Expiries saturate at `u64::MAX` rather than wrap below the counter.
    pub fn arm<T: MachineTimer>(timer: &T, hart: HartId, increment: u64) -> Self {
        let now = timer.read_time();
        let first = now.saturating_add(increment);
        timer.write_compare(hart, first);
        Self { hart, increment, next_expiry: first.saturating_add(increment) }
    }

    /// Tick interrupt path: moves the compare register to the precomputed
    /// expiry and schedules the one after it.
    pub fn on_tick<T: MachineTimer>(&mut self, timer: &T) {
        timer.write_compare(self.hart, self.next_expiry);
        self.next_expiry = self.next_expiry.saturating_add(self.increment);
    }

    #[inline]
    pub fn hart(&self) -> HartId {
        self.hart
    }

    #[inline]
    pub fn increment(&self) -> u64 {
        self.increment
    }

    #[inline]
    pub fn next_expiry(&self) -> u64 {
        self.next_expiry
    }
}

static TIMERS: [Mutex<Option<HartTimer>>; config::MAX_HARTS] =
    [const { Mutex::new(None) }; config::MAX_HARTS];

/// Arms `hart`'s entry in the process-wide table. Harts beyond
/// `MAX_HARTS` are ignored.
pub fn arm<T: MachineTimer>(timer: &T, hart: HartId, increment: u64) {
    if let Some(slot) = TIMERS.get(hart.as_index()) {
        *slot.lock() = Some(HartTimer::arm(timer, hart, increment));
    }
}

/// Advances `hart`'s entry, if it was armed.
pub fn tick<T: MachineTimer>(timer: &T, hart: HartId) {
    if let Some(slot) = TIMERS.get(hart.as_index()) {
        if let Some(state) = slot.lock().as_mut() {
            state.on_tick(timer);
        }
    }
}

pub fn next_expiry(hart: HartId) -> Option<u64> {
    TIMERS.get(hart.as_index()).and_then(|slot| slot.lock().as_ref().map(HartTimer::next_expiry))
}

/// Arms the calling hart with the configured tick increment.
#[cfg(not(feature = "external_tick"))]
pub fn setup_timer_interrupt<C: crate::hal::ControlRegisters, T: MachineTimer>(csrs: &C, timer: &T) {
    arm(timer, csrs.hart_id(), config::TIMER_INCREMENTS_FOR_ONE_TICK);
}

/// Hands tick setup to the application's `port_setup_timer_interrupt`.
#[cfg(feature = "external_tick")]
pub fn setup_timer_interrupt<C: crate::hal::ControlRegisters, T: MachineTimer>(_csrs: &C, _timer: &T) {
    extern "C" {
        fn port_setup_timer_interrupt();
    }
    // SAFETY: application-provided; called once from start_scheduler.
    unsafe { port_setup_timer_interrupt() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::soft::SoftTimer;
    use proptest::prelude::*;

    #[test]
    fn sixteen_megahertz_scenario() {
        let timer = SoftTimer::new(100_000);
        let increment = config::tick_increment(16_000_000, 1_000);
        let state = HartTimer::arm(&timer, HartId::BOOT, increment);
        assert_eq!(timer.compare(HartId::BOOT), Some(116_000));
        assert_eq!(state.next_expiry(), 132_000);
    }

    #[test]
    fn compare_registers_are_per_hart() {
        let timer = SoftTimer::new(500);
        let _ = HartTimer::arm(&timer, HartId::from_raw(1), 10);
        assert_eq!(timer.compare(HartId::from_raw(1)), Some(510));
        assert_eq!(timer.compare(HartId::BOOT), None);
    }

    #[test]
    fn arm_survives_torn_counter_read() {
        let timer = SoftTimer::new(0xFFFF_FFF0);
        timer.tear_next_read(0x1_0000_0002);
        let state = HartTimer::arm(&timer, HartId::BOOT, 100);
        assert_eq!(timer.compare(HartId::BOOT), Some(0x1_0000_0002 + 100));
        assert_eq!(state.next_expiry(), 0x1_0000_0002 + 200);
    }

    #[test]
    fn expiries_never_fall_behind_the_counter() {
        let now = u64::MAX - 10;
        let timer = SoftTimer::new(now);
        let mut state = HartTimer::arm(&timer, HartId::BOOT, 100);
        assert_eq!(timer.compare(HartId::BOOT), Some(u64::MAX));
        state.on_tick(&timer);
        assert_eq!(timer.compare(HartId::BOOT), Some(u64::MAX));
        assert_eq!(state.next_expiry(), u64::MAX);
    }

    #[test]
    fn table_ignores_unknown_harts() {
        let timer = SoftTimer::new(0);
        let hart = HartId::from_raw(config::MAX_HARTS as u16);
        arm(&timer, hart, 10);
        tick(&timer, hart);
        assert_eq!(next_expiry(hart), None);
    }

    #[cfg(not(feature = "external_tick"))]
    #[test]
    fn setup_arms_calling_hart() {
        let hart = crate::hal::soft::SoftHart::with_hart_id(config::MAX_HARTS.saturating_sub(2));
        let timer = SoftTimer::new(7);
        setup_timer_interrupt(&hart, &timer);
        let id = crate::hal::ControlRegisters::hart_id(&hart);
        assert_eq!(timer.compare(id), Some(7 + config::TIMER_INCREMENTS_FOR_ONE_TICK));
        assert_eq!(next_expiry(id), Some(7 + 2 * config::TIMER_INCREMENTS_FOR_ONE_TICK));
    }

    proptest! {
        #[test]
        fn expiries_strictly_increase(start in 0u64..(1 << 48), increment in 1u64..=u32::MAX as u64, ticks in 1usize..64) {
            let timer = SoftTimer::new(start);
            let mut state = HartTimer::arm(&timer, HartId::BOOT, increment);
            let mut previous = timer.compare(HartId::BOOT).unwrap_or_default();
            for _ in 0..ticks {
                state.on_tick(&timer);
                let current = timer.compare(HartId::BOOT).unwrap_or_default();
                prop_assert_eq!(current, previous + increment);
                prop_assert_eq!(state.next_expiry(), current + increment);
                previous = current;
            }
        }
    }
}
