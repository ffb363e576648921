// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#[cfg(feature = "external_tick")]
use std::sync::atomic::{AtomicUsize, Ordering};

use neuron_port::{
    config,
    hal::{
        soft::{SoftHart, SoftTimer},
        ControlRegisters,
    },
    port,
    timer::{self, HartTimer},
    trap::{self, KernelHooks, TrapFrame, TrapOutcome},
    types::HartId,
    GateRange,
};

struct CountingKernel {
    ticks: u32,
}

impl KernelHooks for CountingKernel {
    fn increment_tick(&mut self) -> bool {
        self.ticks += 1;
        false
    }

    fn switch_context(&mut self) {}
}

const MACHINE_TIMER_INTERRUPT: usize = (1 << (usize::BITS - 1)) | 7;

#[test]
fn sixteen_megahertz_one_kilohertz() {
    let increment = config::tick_increment(16_000_000, 1_000);
    assert_eq!(increment, 16_000);
    let timer = SoftTimer::new(100_000);
    let state = HartTimer::arm(&timer, HartId::BOOT, increment);
    assert_eq!(timer.compare(HartId::BOOT), Some(116_000));
    assert_eq!(state.next_expiry(), 132_000);
}

#[cfg(not(feature = "external_tick"))]
#[test]
fn start_then_tick_through_the_trap_path() {
    let hart = SoftHart::with_hart_id(1);
    let timer = SoftTimer::new(1_000);
    port::prepare_scheduler(&hart, &timer, 0x8004_0000).expect("startup invariants hold");

    let id = hart.hart_id();
    let step = config::TIMER_INCREMENTS_FOR_ONE_TICK;
    assert_eq!(timer.compare(id), Some(1_000 + step));

    let mut kernel = CountingKernel { ticks: 0 };
    let mut frame = TrapFrame { mcause: MACHINE_TIMER_INTERRUPT, ..TrapFrame::default() };
    let gate = GateRange::new(0, 0);
    for n in 1..=5u64 {
        timer.set_time(1_000 + n * step);
        let outcome = trap::handle_trap(&hart, &timer, &gate, &mut frame, &mut kernel);
        assert_eq!(outcome, TrapOutcome::Resume);
        assert_eq!(timer.compare(id), Some(1_000 + (n + 1) * step));
    }
    assert_eq!(kernel.ticks, 5);
    assert_eq!(timer::next_expiry(id), Some(1_000 + 7 * step));
}

#[cfg(feature = "external_tick")]
static APPLICATION_SETUPS: AtomicUsize = AtomicUsize::new(0);

#[cfg(feature = "external_tick")]
#[no_mangle]
extern "C" fn port_setup_timer_interrupt() {
    APPLICATION_SETUPS.fetch_add(1, Ordering::SeqCst);
}

#[cfg(feature = "external_tick")]
#[test]
fn application_tick_replaces_clint_arming() {
    let hart = SoftHart::with_hart_id(1);
    let timer = SoftTimer::new(1_000);
    port::prepare_scheduler(&hart, &timer, 0x8004_0000).expect("startup invariants hold");

    let id = hart.hart_id();
    assert_eq!(APPLICATION_SETUPS.load(Ordering::SeqCst), 1);
    assert_eq!(timer.compare(id), None);
    assert_eq!(timer::next_expiry(id), None);

    // Without an armed table slot the trap path still reaches the kernel tick.
    let mut kernel = CountingKernel { ticks: 0 };
    let mut frame = TrapFrame { mcause: MACHINE_TIMER_INTERRUPT, ..TrapFrame::default() };
    let outcome = trap::handle_trap(&hart, &timer, &GateRange::new(0, 0), &mut frame, &mut kernel);
    assert_eq!(outcome, TrapOutcome::Resume);
    assert_eq!(kernel.ticks, 1);
    assert_eq!(timer.compare(id), None);
}
