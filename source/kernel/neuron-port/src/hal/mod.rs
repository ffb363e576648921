// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Narrow hardware control-register interface for the port layer
//! OWNERS: @kernel-arch-team
//! PUBLIC API: ControlRegisters, MachineTimer, Mstatus, PrivilegeMode, PMP geometry constants
//! DEPENDS_ON: hal::machine (RV32 bare metal), hal::soft (host fake)
//! INVARIANTS: Every CSR touched by the gate, the dispatcher, the context extension and
//!             the tick path goes through these traits; nothing above them uses inline asm

#[cfg(all(target_arch = "riscv32", target_os = "none"))]
pub mod machine;
pub mod soft;

use bitflags::bitflags;

use crate::{config, types::HartId};

bitflags! {
    /// `mstatus` bits the port reads or rewrites. Identical on RV32 and RV64.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct Mstatus: usize {
        const UIE = 1 << 0;
        const MIE = 1 << 3;
        const UPIE = 1 << 4;
        const MPIE = 1 << 7;
        /// Two-bit previous-privilege field; `00` = U, `11` = M.
        const MPP = 3 << 11;
        const MPRV = 1 << 17;
    }
}

/// `misa` bit advertising user mode.
pub const MISA_EXTENSION_U: usize = 1 << 20;

/// Low two bits of `mtvec`; zero selects direct (single vector) mode.
pub const MTVEC_MODE_MASK: usize = 0b11;

/// `mie` machine timer interrupt enable.
pub const MIE_MTIE: usize = 1 << 7;
/// `mie` machine external interrupt enable.
pub const MIE_MEIE: usize = 1 << 11;

/// PMP entries packed into one `pmpcfg` register (one byte per entry).
pub const PMP_ENTRIES_PER_CFG: usize = config::WORD_SIZE;

/// Number of `pmpcfg` registers backing [`config::PMP_ENTRIES`] entries.
pub const PMP_CFG_REGS: usize = config::PMP_ENTRIES.div_ceil(PMP_ENTRIES_PER_CFG);

/// Hardware privilege levels available on an M/U part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrivilegeMode {
    User,
    Machine,
}

impl PrivilegeMode {
    /// Decodes the `MPP` field of an `mstatus` value. Supervisor encodings are
    /// treated as user since the part has no S-mode.
    #[inline]
    pub const fn from_mpp(mstatus: usize) -> Self {
        if mstatus & Mstatus::MPP.bits() == Mstatus::MPP.bits() {
            Self::Machine
        } else {
            Self::User
        }
    }

    /// Bit pattern placed in `MPP` to return to this mode.
    #[inline]
    pub const fn mpp_bits(self) -> usize {
        match self {
            Self::User => 0,
            Self::Machine => Mstatus::MPP.bits(),
        }
    }
}

/// Machine-mode CSRs used by the port.
///
/// All methods take `&self`: the hardware implementation is a zero-sized
/// handle and the software fake uses interior mutability.
pub trait ControlRegisters {
    fn mstatus(&self) -> usize;
    fn set_mstatus(&self, value: usize);
    /// Trap return address.
    fn mepc(&self) -> usize;
    fn set_mepc(&self, value: usize);
    fn misa(&self) -> usize;
    fn mtvec(&self) -> usize;
    fn mhartid(&self) -> usize;
    /// Sets bits in `mie`.
    fn enable_interrupt_sources(&self, mask: usize);

    /// Reads `pmpcfg{index}`. Out-of-range indices read as zero.
    fn pmpcfg(&self, index: usize) -> usize;
    /// Writes `pmpcfg{index}`. WARL: illegal values are silently dropped by hardware.
    fn set_pmpcfg(&self, index: usize, value: usize);
    /// Reads `pmpaddr{index}`. Out-of-range indices read as zero.
    fn pmpaddr(&self, index: usize) -> usize;
    fn set_pmpaddr(&self, index: usize, value: usize);

    /// Executes `mret`. On hardware control continues at `mepc` and this call
    /// does not come back to the caller's frame.
    fn mret(&self);

    /// Current hart identity.
    #[inline]
    fn hart_id(&self) -> HartId {
        HartId::from_raw(self.mhartid() as u16)
    }
}

/// Memory-mapped machine timer (`mtime` + per-hart `mtimecmp`).
pub trait MachineTimer {
    /// Upper 32 bits of `mtime`.
    fn read_time_high(&self) -> u32;
    /// Lower 32 bits of `mtime`.
    fn read_time_low(&self) -> u32;
    /// Programs `mtimecmp` of `hart`.
    fn write_compare(&self, hart: HartId, deadline: u64);

    /// Reads the 64-bit counter, retrying when the high word changed between
    /// the two halves.
    fn read_time(&self) -> u64 {
        loop {
            let high = self.read_time_high();
            let low = self.read_time_low();
            if high == self.read_time_high() {
                return (u64::from(high) << 32) | u64::from(low);
            }
        }
    }
}
