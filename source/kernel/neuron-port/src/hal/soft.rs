// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Software hart and timer for host builds and selftests
//! OWNERS: @kernel-arch-team
//! PUBLIC API: SoftHart (trap entry / mret emulation), SoftTimer (scripted counter, per-hart compare)
//! INVARIANTS: Trap entry and mret follow the privileged ISA field updates for an M/U hart;
//!             PMP registers store any written value

use core::cell::Cell;

use super::{ControlRegisters, MachineTimer, Mstatus, PrivilegeMode, PMP_CFG_REGS};
use crate::{config, types::HartId};

/// Single hart with M and U modes.
pub struct SoftHart {
    mode: Cell<PrivilegeMode>,
    mstatus: Cell<usize>,
    mepc: Cell<usize>,
    misa: Cell<usize>,
    mtvec: Cell<usize>,
    mhartid: usize,
    mie: Cell<usize>,
    pmpcfg: [Cell<usize>; PMP_CFG_REGS],
    pmpaddr: [Cell<usize>; config::PMP_ENTRIES],
    mret_count: Cell<usize>,
}

impl SoftHart {
    /// Hart 0 running in machine mode with `misa.U` set, as after reset.
    pub fn new() -> Self {
        Self::with_hart_id(0)
    }

    pub fn with_hart_id(mhartid: usize) -> Self {
        Self {
            mode: Cell::new(PrivilegeMode::Machine),
            mstatus: Cell::new(0),
            mepc: Cell::new(0),
            misa: Cell::new(super::MISA_EXTENSION_U),
            mtvec: Cell::new(0),
            mhartid,
            mie: Cell::new(0),
            pmpcfg: core::array::from_fn(|_| Cell::new(0)),
            pmpaddr: core::array::from_fn(|_| Cell::new(0)),
            mret_count: Cell::new(0),
        }
    }

    /// Privilege level the hart is currently executing at.
    pub fn mode(&self) -> PrivilegeMode {
        self.mode.get()
    }

    pub fn set_mode(&self, mode: PrivilegeMode) {
        self.mode.set(mode);
    }

    pub fn set_misa(&self, value: usize) {
        self.misa.set(value);
    }

    pub fn set_mtvec(&self, value: usize) {
        self.mtvec.set(value);
    }

    /// Live `mstatus.MIE`.
    pub fn interrupts_enabled(&self) -> bool {
        self.mstatus.get() & Mstatus::MIE.bits() != 0
    }

    pub fn set_interrupts_enabled(&self, enabled: bool) {
        let mut status = Mstatus::from_bits_retain(self.mstatus.get());
        status.set(Mstatus::MIE, enabled);
        self.mstatus.set(status.bits());
    }

    pub fn mie(&self) -> usize {
        self.mie.get()
    }

    pub fn mret_count(&self) -> usize {
        self.mret_count.get()
    }

    /// Synchronous trap into M-mode at `pc` (e.g. an `ecall`).
    pub fn take_trap(&self, pc: usize) {
        let mut status = Mstatus::from_bits_retain(self.mstatus.get());
        let mie = status.contains(Mstatus::MIE);
        status.remove(Mstatus::MPP);
        status.insert(Mstatus::from_bits_retain(self.mode.get().mpp_bits()));
        status.set(Mstatus::MPIE, mie);
        status.remove(Mstatus::MIE);
        self.mstatus.set(status.bits());
        self.mepc.set(pc);
        self.mode.set(PrivilegeMode::Machine);
    }
}

impl Default for SoftHart {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlRegisters for SoftHart {
    fn mstatus(&self) -> usize {
        self.mstatus.get()
    }

    fn set_mstatus(&self, value: usize) {
        self.mstatus.set(value);
    }

    fn mepc(&self) -> usize {
        self.mepc.get()
    }

    fn set_mepc(&self, value: usize) {
        self.mepc.set(value);
    }

    fn misa(&self) -> usize {
        self.misa.get()
    }

    fn mtvec(&self) -> usize {
        self.mtvec.get()
    }

    fn mhartid(&self) -> usize {
        self.mhartid
    }

    fn enable_interrupt_sources(&self, mask: usize) {
        self.mie.set(self.mie.get() | mask);
    }

    fn pmpcfg(&self, index: usize) -> usize {
        self.pmpcfg.get(index).map_or(0, Cell::get)
    }

    fn set_pmpcfg(&self, index: usize, value: usize) {
        if let Some(reg) = self.pmpcfg.get(index) {
            reg.set(value);
        }
    }

    fn pmpaddr(&self, index: usize) -> usize {
        self.pmpaddr.get(index).map_or(0, Cell::get)
    }

    fn set_pmpaddr(&self, index: usize, value: usize) {
        if let Some(reg) = self.pmpaddr.get(index) {
            reg.set(value);
        }
    }

    /// mode ← MPP, MIE ← MPIE, MPIE ← 1, MPP ← U.
    fn mret(&self) {
        let mut status = Mstatus::from_bits_retain(self.mstatus.get());
        self.mode.set(PrivilegeMode::from_mpp(status.bits()));
        let mpie = status.contains(Mstatus::MPIE);
        status.set(Mstatus::MIE, mpie);
        status.insert(Mstatus::MPIE);
        status.remove(Mstatus::MPP);
        self.mstatus.set(status.bits());
        self.mret_count.set(self.mret_count.get() + 1);
    }
}

/// Scripted `mtime` with one compare register per hart.
pub struct SoftTimer {
    time: Cell<u64>,
    jump_after_high_read: Cell<Option<u64>>,
    high_reads: Cell<usize>,
    compare: [Cell<Option<u64>>; config::MAX_HARTS],
}

impl SoftTimer {
    pub fn new(time: u64) -> Self {
        Self {
            time: Cell::new(time),
            jump_after_high_read: Cell::new(None),
            high_reads: Cell::new(0),
            compare: core::array::from_fn(|_| Cell::new(None)),
        }
    }

    pub fn set_time(&self, time: u64) {
        self.time.set(time);
    }

    pub fn time(&self) -> u64 {
        self.time.get()
    }

    /// Makes the counter move to `time` right after the next high-word read,
    /// producing a torn read for a reader that does not re-check.
    pub fn tear_next_read(&self, time: u64) {
        self.jump_after_high_read.set(Some(time));
    }

    pub fn high_reads(&self) -> usize {
        self.high_reads.get()
    }

    /// Last value programmed into `hart`'s compare register.
    pub fn compare(&self, hart: HartId) -> Option<u64> {
        self.compare.get(hart.as_index()).and_then(Cell::get)
    }
}

impl MachineTimer for SoftTimer {
    fn read_time_high(&self) -> u32 {
        self.high_reads.set(self.high_reads.get() + 1);
        let high = (self.time.get() >> 32) as u32;
        if let Some(next) = self.jump_after_high_read.take() {
            self.time.set(next);
        }
        high
    }

    fn read_time_low(&self) -> u32 {
        self.time.get() as u32
    }

    fn write_compare(&self, hart: HartId, deadline: u64) {
        if let Some(reg) = self.compare.get(hart.as_index()) {
            reg.set(Some(deadline));
        }
    }
}
