// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! RV32 bare-metal backend for [`ControlRegisters`] and [`MachineTimer`].
//!
//! `pmpcfg`/`pmpaddr` are addressed by CSR number in the instruction
//! encoding, so indexed access expands to one arm per register.

use core::arch::asm;
use core::ptr::{read_volatile, write_volatile};

use super::{ControlRegisters, MachineTimer};
use crate::types::HartId;

macro_rules! csr_read {
    ($csr:literal) => {{
        let value: usize;
        // SAFETY: reading a machine CSR from M-mode has no side effects.
        unsafe {
            asm!(concat!("csrr {0}, ", $csr), out(reg) value, options(nomem, nostack, preserves_flags));
        }
        value
    }};
}

macro_rules! csr_write {
    ($csr:literal, $value:expr) => {{
        let value: usize = $value;
        // SAFETY: only reachable from M-mode port code; WARL CSRs drop illegal values.
        unsafe {
            asm!(concat!("csrw ", $csr, ", {0}"), in(reg) value, options(nostack));
        }
    }};
}

macro_rules! indexed_csr {
    ($read:ident, $write:ident, $($index:literal => $csr:literal),+ $(,)?) => {
        fn $read(index: usize) -> usize {
            match index {
                $($index => csr_read!($csr),)+
                _ => 0,
            }
        }

        fn $write(index: usize, value: usize) {
            match index {
                $($index => csr_write!($csr, value),)+
                _ => {}
            }
        }
    };
}

indexed_csr!(read_pmpcfg, write_pmpcfg,
    0 => "pmpcfg0", 1 => "pmpcfg1", 2 => "pmpcfg2", 3 => "pmpcfg3",
);

indexed_csr!(read_pmpaddr, write_pmpaddr,
    0 => "pmpaddr0", 1 => "pmpaddr1", 2 => "pmpaddr2", 3 => "pmpaddr3",
    4 => "pmpaddr4", 5 => "pmpaddr5", 6 => "pmpaddr6", 7 => "pmpaddr7",
    8 => "pmpaddr8", 9 => "pmpaddr9", 10 => "pmpaddr10", 11 => "pmpaddr11",
    12 => "pmpaddr12", 13 => "pmpaddr13", 14 => "pmpaddr14", 15 => "pmpaddr15",
);

/// The executing hart's machine-mode CSRs.
#[derive(Clone, Copy, Default)]
pub struct Machine;

impl ControlRegisters for Machine {
    #[inline]
    fn mstatus(&self) -> usize {
        csr_read!("mstatus")
    }

    #[inline]
    fn set_mstatus(&self, value: usize) {
        csr_write!("mstatus", value);
    }

    #[inline]
    fn mepc(&self) -> usize {
        csr_read!("mepc")
    }

    #[inline]
    fn set_mepc(&self, value: usize) {
        csr_write!("mepc", value);
    }

    #[inline]
    fn misa(&self) -> usize {
        csr_read!("misa")
    }

    #[inline]
    fn mtvec(&self) -> usize {
        csr_read!("mtvec")
    }

    #[inline]
    fn mhartid(&self) -> usize {
        riscv::register::mhartid::read()
    }

    #[allow(unused_unsafe)]
    fn enable_interrupt_sources(&self, mask: usize) {
        // SAFETY: called once the trap vector and the first compare value are in place.
        unsafe {
            if mask & super::MIE_MTIE != 0 {
                riscv::register::mie::set_mtimer();
            }
            if mask & super::MIE_MEIE != 0 {
                riscv::register::mie::set_mext();
            }
        }
    }

    #[inline]
    fn pmpcfg(&self, index: usize) -> usize {
        read_pmpcfg(index)
    }

    #[inline]
    fn set_pmpcfg(&self, index: usize, value: usize) {
        write_pmpcfg(index, value);
    }

    #[inline]
    fn pmpaddr(&self, index: usize) -> usize {
        read_pmpaddr(index)
    }

    #[inline]
    fn set_pmpaddr(&self, index: usize, value: usize) {
        write_pmpaddr(index, value);
    }

    fn mret(&self) {
        // SAFETY: caller has programmed mepc/mstatus for the target context.
        unsafe { asm!("mret", options(noreturn)) }
    }
}

/// Issues a WFI instruction.
#[inline]
#[allow(unused_unsafe)]
pub fn wait_for_interrupt() {
    // SAFETY: wfi only stalls the hart until the next interrupt.
    unsafe { riscv::asm::wfi() }
}

/// CLINT-style timer: a shared `mtime` and one `mtimecmp` per hart.
#[derive(Clone, Copy)]
pub struct ClintTimer {
    mtime_base: usize,
    mtimecmp_base: usize,
}

impl ClintTimer {
    pub const fn new(mtime_base: usize, mtimecmp_base: usize) -> Self {
        Self { mtime_base, mtimecmp_base }
    }

    /// Timer at the configured addresses.
    pub const fn configured() -> Self {
        Self::new(crate::config::MTIME_BASE_ADDRESS, crate::config::MTIMECMP_BASE_ADDRESS)
    }

    /// Address of `hart`'s compare register.
    #[inline]
    pub const fn compare_address(&self, hart: HartId) -> usize {
        self.mtimecmp_base + hart.as_index() * core::mem::size_of::<u64>()
    }
}

impl MachineTimer for ClintTimer {
    fn read_time_high(&self) -> u32 {
        // SAFETY: configured MMIO address of mtime; high word is 4 bytes up.
        unsafe { read_volatile((self.mtime_base + 4) as *const u32) }
    }

    fn read_time_low(&self) -> u32 {
        // SAFETY: configured MMIO address of mtime.
        unsafe { read_volatile(self.mtime_base as *const u32) }
    }

    fn write_compare(&self, hart: HartId, deadline: u64) {
        let low = self.compare_address(hart) as *mut u32;
        let high = (self.compare_address(hart) + 4) as *mut u32;
        // SAFETY: per-hart mtimecmp; parking the low word at all-ones first keeps
        // the intermediate 64-bit value from firing early.
        unsafe {
            write_volatile(low, u32::MAX);
            write_volatile(high, (deadline >> 32) as u32);
            write_volatile(low, deadline as u32);
        }
    }
}
