// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Chip-specific registers saved with every task context
//! OWNERS: @kernel-arch-team
//! PUBLIC API: ContextExtension, NoExtension, PmpExtension, ActiveExtension,
//!             port_save_additional_context / port_restore_additional_context (RV32)
//! DEPENDS_ON: hal::ControlRegisters
//! INVARIANTS: restore(save(sp)) == sp and reproduces every saved register;
//!             the block size keeps the stack pointer 16-byte aligned

#[cfg(test)]
mod tests_prop;

use static_assertions::const_assert_eq;

use crate::{
    config::{PMP_ENTRIES, STACK_ALIGNMENT, WORD_SIZE},
    hal::{ControlRegisters, PMP_CFG_REGS},
};

/// Extra per-task state pushed below the general-purpose register frame.
pub trait ContextExtension {
    /// Block size in machine words.
    const WORDS: usize;
    /// Block size in bytes.
    const BYTES: usize = Self::WORDS * WORD_SIZE;

    /// Pushes the block below `sp` and returns the new stack pointer.
    ///
    /// # Safety
    /// `sp - WORDS` up to `sp` must be writable stack memory of the task
    /// being switched out.
    unsafe fn save<C: ControlRegisters>(csrs: &C, sp: *mut usize) -> *mut usize;

    /// Pops a block written by [`save`](Self::save) and returns the stack
    /// pointer above it.
    ///
    /// # Safety
    /// `sp` must point at a block written by `save`.
    unsafe fn restore<C: ControlRegisters>(csrs: &C, sp: *mut usize) -> *mut usize;
}

/// Chips with nothing beyond the integer registers.
pub struct NoExtension;

impl ContextExtension for NoExtension {
    const WORDS: usize = 0;

    #[inline]
    unsafe fn save<C: ControlRegisters>(_csrs: &C, sp: *mut usize) -> *mut usize {
        sp
    }

    #[inline]
    unsafe fn restore<C: ControlRegisters>(_csrs: &C, sp: *mut usize) -> *mut usize {
        sp
    }
}

const fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

/// PMP configuration and address registers.
///
/// Slots: `pmpcfg0..` first, then `pmpaddr0..`, then zero padding up to the
/// stack alignment.
pub struct PmpExtension;

impl PmpExtension {
    const USED_WORDS: usize = PMP_CFG_REGS + PMP_ENTRIES;
    const ADDR_SLOT: usize = PMP_CFG_REGS;
}

impl ContextExtension for PmpExtension {
    const WORDS: usize = round_up(Self::USED_WORDS, STACK_ALIGNMENT / WORD_SIZE);

    unsafe fn save<C: ControlRegisters>(csrs: &C, sp: *mut usize) -> *mut usize {
        let block = sp.sub(Self::WORDS);
        for index in 0..PMP_CFG_REGS {
            block.add(index).write(csrs.pmpcfg(index));
        }
        for entry in 0..PMP_ENTRIES {
            block.add(Self::ADDR_SLOT + entry).write(csrs.pmpaddr(entry));
        }
        for pad in Self::USED_WORDS..Self::WORDS {
            block.add(pad).write(0);
        }
        block
    }

    unsafe fn restore<C: ControlRegisters>(csrs: &C, sp: *mut usize) -> *mut usize {
        // Addresses go in while every entry is off.
        for index in 0..PMP_CFG_REGS {
            csrs.set_pmpcfg(index, 0);
        }
        for entry in 0..PMP_ENTRIES {
            csrs.set_pmpaddr(entry, sp.add(Self::ADDR_SLOT + entry).read());
        }
        for index in 0..PMP_CFG_REGS {
            csrs.set_pmpcfg(index, sp.add(index).read());
        }
        sp.add(Self::WORDS)
    }
}

const_assert_eq!(PmpExtension::WORDS % 2, 0);
const_assert_eq!(PmpExtension::BYTES % STACK_ALIGNMENT, 0);
const_assert_eq!(NoExtension::BYTES, 0);

/// Extension compiled into this build.
#[cfg(feature = "pmp_context")]
pub type ActiveExtension = PmpExtension;
#[cfg(not(feature = "pmp_context"))]
pub type ActiveExtension = NoExtension;

#[cfg(all(target_arch = "riscv32", target_os = "none"))]
mod entry {
    use super::{ActiveExtension, ContextExtension};
    use crate::hal::machine::Machine;

    /// Size the trap prologue reserves for the extension.
    #[no_mangle]
    pub static PORT_ADDITIONAL_CONTEXT_BYTES: usize = ActiveExtension::BYTES;

    /// # Safety
    /// Called by the context-save path with the task's stack pointer.
    #[no_mangle]
    pub unsafe extern "C" fn port_save_additional_context(sp: *mut usize) -> *mut usize {
        ActiveExtension::save(&Machine, sp)
    }

    /// # Safety
    /// Called by the context-restore path with the value `save` returned.
    #[no_mangle]
    pub unsafe extern "C" fn port_restore_additional_context(sp: *mut usize) -> *mut usize {
        ActiveExtension::restore(&Machine, sp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::soft::SoftHart;
    use std::vec;

    #[test]
    fn layout_is_cfg_then_addr_then_padding() {
        let hart = SoftHart::new();
        hart.set_pmpcfg(0, 0x1f);
        hart.set_pmpaddr(0, 0x2000_0fff);
        hart.set_pmpaddr(PMP_ENTRIES - 1, 0x77);
        let mut stack = vec![usize::MAX; PmpExtension::WORDS + 2];
        // SAFETY: the block fits below the end of `stack`.
        let block = unsafe {
            let top = stack.as_mut_ptr().add(stack.len());
            PmpExtension::save(&hart, top)
        };
        let offset = 2;
        assert_eq!(block, unsafe { stack.as_mut_ptr().add(offset) });
        let saved = &stack[offset..];
        assert_eq!(saved[0], 0x1f);
        assert_eq!(saved[PMP_CFG_REGS], 0x2000_0fff);
        assert_eq!(saved[PMP_CFG_REGS + PMP_ENTRIES - 1], 0x77);
        assert!(saved[PMP_CFG_REGS + PMP_ENTRIES..].iter().all(|&slot| slot == 0));
        assert_eq!(stack[0], usize::MAX);
    }

    #[test]
    fn empty_extension_leaves_stack_alone() {
        let hart = SoftHart::new();
        let mut word = 0usize;
        let sp: *mut usize = &mut word;
        // SAFETY: NoExtension never dereferences sp.
        unsafe {
            assert_eq!(NoExtension::save(&hart, sp), sp);
            assert_eq!(NoExtension::restore(&hart, sp), sp);
        }
    }
}
