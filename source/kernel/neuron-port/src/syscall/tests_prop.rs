// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the trap-time dispatcher
//! OWNERS: @kernel-team
//! NOTE: Tests only; drives the real dispatcher against the software hart.
//!
//! TEST_SCOPE:
//!   - Escalation is fail-closed outside the gate range
//!   - mepc advances by one ecall width for every request id
//!
//! TEST_SCENARIOS:
//!   - outside_range_never_escalates(): any ecall site outside [start, end) returns in user mode
//!   - inside_range_always_escalates(): any ecall site inside the range returns in machine mode
//!   - mepc_advances_for_any_id(): known and unknown ids alike move mepc past the ecall
//!   - gate_pair_is_symmetric(): raise then reset restores the starting level from any site

use super::{dispatch, GateRange, Syscall};
use crate::gate::{PrivilegeGate, SoftGate};
use crate::{
    hal::{soft::SoftHart, ControlRegisters, PrivilegeMode},
    trap::TrapFrame,
};
use proptest::prelude::*;

const START: usize = 0x4000_0000;
const END: usize = 0x4000_0400;

fn arb_outside() -> impl Strategy<Value = usize> {
    prop_oneof![0usize..START, END..usize::MAX - 4].prop_map(|pc| pc & !0x3)
}

fn run(hart: &SoftHart, pc: usize, id: usize) {
    hart.take_trap(pc);
    let mut frame = TrapFrame::default();
    frame.set_a7(id);
    let _ = dispatch(hart, &GateRange::new(START, END), &mut frame);
    hart.mret();
}

proptest! {
    #[test]
    fn outside_range_never_escalates(pc in arb_outside(), mie in any::<bool>()) {
        let hart = SoftHart::new();
        hart.set_mode(PrivilegeMode::User);
        hart.set_interrupts_enabled(mie);
        run(&hart, pc, Syscall::RequestAccess.id());
        prop_assert_eq!(hart.mode(), PrivilegeMode::User);
        prop_assert_eq!(hart.interrupts_enabled(), mie);
    }

    #[test]
    fn inside_range_always_escalates(offset in 0usize..(END - START) / 4) {
        let hart = SoftHart::new();
        hart.set_mode(PrivilegeMode::User);
        run(&hart, START + offset * 4, Syscall::RequestAccess.id());
        prop_assert_eq!(hart.mode(), PrivilegeMode::Machine);
    }

    #[test]
    fn mepc_advances_for_any_id(pc in (0usize..usize::MAX - 4).prop_map(|pc| pc & !0x3), id in any::<usize>()) {
        let hart = SoftHart::new();
        hart.take_trap(pc);
        let mut frame = TrapFrame::default();
        frame.set_a7(id);
        let _ = dispatch(&hart, &GateRange::new(START, END), &mut frame);
        prop_assert_eq!(hart.mepc(), pc + 4);
        prop_assert_eq!(frame.mepc, pc + 4);
    }

    #[test]
    fn gate_pair_is_symmetric(pc in (0usize..usize::MAX - 8).prop_map(|pc| pc & !0x3), machine in any::<bool>()) {
        let initial = if machine { PrivilegeMode::Machine } else { PrivilegeMode::User };
        let hart = SoftHart::new();
        hart.set_mode(initial);
        let gate = SoftGate::new(&hart, GateRange::new(START, END), pc);
        let token = gate.raise();
        gate.reset(token);
        prop_assert_eq!(hart.mode(), initial);
    }
}
