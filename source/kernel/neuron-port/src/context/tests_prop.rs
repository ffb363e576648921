// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the PMP context extension
//! OWNERS: @kernel-arch-team
//! NOTE: Tests only; saves from one software hart and restores into a clobbered one.
//!
//! TEST_SCOPE:
//!   - save/restore round trip of every pmpcfg/pmpaddr register
//!   - stack pointer symmetry and alignment of the saved block
//!
//! TEST_SCENARIOS:
//!   - roundtrip_restores_every_register(): arbitrary register values survive save then restore
//!   - block_keeps_stack_aligned(): an aligned sp stays aligned after save

use super::{ContextExtension, PmpExtension};
use crate::{
    config::{PMP_ENTRIES, STACK_ALIGNMENT},
    hal::{soft::SoftHart, ControlRegisters, PMP_CFG_REGS},
};
use proptest::prelude::*;
use std::vec::Vec;

fn arb_registers() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    (
        proptest::collection::vec(any::<usize>(), PMP_CFG_REGS),
        proptest::collection::vec(any::<usize>(), PMP_ENTRIES),
    )
}

proptest! {
    #[test]
    fn roundtrip_restores_every_register((cfgs, addrs) in arb_registers(), junk in any::<usize>()) {
        let task = SoftHart::new();
        for (index, value) in cfgs.iter().enumerate() {
            task.set_pmpcfg(index, *value);
        }
        for (entry, value) in addrs.iter().enumerate() {
            task.set_pmpaddr(entry, *value);
        }

        let mut stack = std::vec![0usize; PmpExtension::WORDS];
        let top = stack.as_mut_ptr().wrapping_add(stack.len());
        // SAFETY: the block exactly fills `stack`.
        let block = unsafe { PmpExtension::save(&task, top) };

        let other = SoftHart::new();
        for index in 0..PMP_CFG_REGS {
            other.set_pmpcfg(index, junk);
        }
        for entry in 0..PMP_ENTRIES {
            other.set_pmpaddr(entry, junk.rotate_left(entry as u32));
        }
        // SAFETY: `block` was produced by save above.
        let restored = unsafe { PmpExtension::restore(&other, block) };

        prop_assert_eq!(restored, top);
        for (index, value) in cfgs.iter().enumerate() {
            prop_assert_eq!(other.pmpcfg(index), *value);
        }
        for (entry, value) in addrs.iter().enumerate() {
            prop_assert_eq!(other.pmpaddr(entry), *value);
        }
    }

    #[test]
    fn block_keeps_stack_aligned(extra in 0usize..8) {
        let hart = SoftHart::new();
        let words = PmpExtension::WORDS + extra + STACK_ALIGNMENT;
        let mut stack = std::vec![0usize; words];
        let base = stack.as_mut_ptr();
        let mut top = base.wrapping_add(words);
        while (top as usize) % STACK_ALIGNMENT != 0 {
            top = top.wrapping_sub(1);
        }
        // SAFETY: at least WORDS slots lie between base and the aligned top.
        let block = unsafe { PmpExtension::save(&hart, top) };
        prop_assert_eq!(block as usize % STACK_ALIGNMENT, 0);
        prop_assert_eq!(top as usize - block as usize, PmpExtension::BYTES);
    }
}
