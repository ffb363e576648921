// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: One-way drop from machine mode to user mode at boot or task start
//! OWNERS: @kernel-team
//! PUBLIC API: is_user_mode_supported(), drop_privilege(), switch_to_user_mode(),
//!             port_switch_to_user_mode (RV32 symbol)
//! DEPENDS_ON: hal::ControlRegisters, syscall::return_to
//! INVARIANTS: After the switch, machine mode is only reachable again through the
//!             dispatcher's RequestAccess path

use crate::{
    hal::{ControlRegisters, Mstatus, PrivilegeMode, MISA_EXTENSION_U},
    syscall,
};

/// `misa.U`: the hart implements user mode. Callers decide what to do when
/// it does not.
#[inline]
pub fn is_user_mode_supported<C: ControlRegisters>(csrs: &C) -> bool {
    csrs.misa() & MISA_EXTENSION_U != 0
}

/// Arms the next `mret` to land in user mode with the current interrupt
/// enables. Same bit manipulation as the RemoveAccess request.
#[inline]
pub fn drop_privilege<C: ControlRegisters>(csrs: &C) {
    let mstatus = csrs.mstatus();
    let mie = mstatus & Mstatus::MIE.bits() != 0;
    csrs.set_mstatus(syscall::return_to(mstatus, PrivilegeMode::User, mie));
}

/// Continues at `return_address` in user mode.
///
/// On hardware the `mret` does not come back; on the software hart the call
/// returns with the hart in user mode.
pub fn switch_to_user_mode<C: ControlRegisters>(csrs: &C, return_address: usize) {
    csrs.set_mepc(return_address);
    drop_privilege(csrs);
    csrs.mret();
}

// Operands of the `port_switch_to_user_mode` stub.
#[cfg_attr(not(all(target_arch = "riscv32", target_os = "none")), allow(dead_code))]
const SWITCH_CLEAR: usize = Mstatus::MPP.bits() | Mstatus::MPIE.bits() | Mstatus::UPIE.bits();
#[cfg_attr(not(all(target_arch = "riscv32", target_os = "none")), allow(dead_code))]
const MIE_TO_MPIE: u32 = Mstatus::MPIE.bits().trailing_zeros() - Mstatus::MIE.bits().trailing_zeros();
#[cfg_attr(not(all(target_arch = "riscv32", target_os = "none")), allow(dead_code))]
const UIE_TO_UPIE: u32 = Mstatus::UPIE.bits().trailing_zeros() - Mstatus::UIE.bits().trailing_zeros();

// Same rewrite as `drop_privilege` with `mepc = ra`, done without a stack
// frame so the caller resumes with its own `sp`.
#[cfg(all(target_arch = "riscv32", target_os = "none"))]
core::arch::global_asm!(
    ".section .text.port_switch_to_user_mode",
    ".global port_switch_to_user_mode",
    "port_switch_to_user_mode:",
    "    csrw mepc, ra",
    "    csrr t0, mstatus",
    "    li t1, {clear}",
    "    not t1, t1",
    "    and t0, t0, t1",
    "    andi t1, t0, {mie}",
    "    slli t1, t1, {mie_to_mpie}",
    "    or t0, t0, t1",
    "    andi t1, t0, {uie}",
    "    slli t1, t1, {uie_to_upie}",
    "    or t0, t0, t1",
    "    csrw mstatus, t0",
    "    mret",
    clear = const SWITCH_CLEAR,
    mie = const Mstatus::MIE.bits(),
    mie_to_mpie = const MIE_TO_MPIE,
    uie = const Mstatus::UIE.bits(),
    uie_to_upie = const UIE_TO_UPIE,
);
