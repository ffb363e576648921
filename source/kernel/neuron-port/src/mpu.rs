// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-task protection region table built at task creation and installed on switch-in
//! OWNERS: @kernel-arch-team
//! PUBLIC API: RegionPermissions, MpuSettings, RegionLayout, store_task_mpu_settings(), napot_encode()
//! DEPENDS_ON: hal::ControlRegisters, config::{TOTAL_MPU_REGIONS, PMP_ENTRIES}
//! INVARIANTS: Regions 0..=4 are reserved (unprivileged flash, privileged flash, privileged RAM,
//!             peripherals, stack); an entry is either fully valid or fully disabled (all zero);
//!             install never enables a cfg byte before its address is written

use core::fmt;

use bitflags::bitflags;

use crate::{
    config,
    hal::{ControlRegisters, PMP_CFG_REGS, PMP_ENTRIES_PER_CFG},
    types::{MemoryRegion, StackDepth},
};

bitflags! {
    /// Access granted to unprivileged code inside a region.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RegionPermissions: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

/// `pmpcfg` byte fields.
pub mod pmpcfg {
    pub const R: u8 = 1 << 0;
    pub const W: u8 = 1 << 1;
    pub const X: u8 = 1 << 2;
    pub const A_OFF: u8 = 0;
    pub const A_TOR: u8 = 1 << 3;
    pub const A_NA4: u8 = 2 << 3;
    pub const A_NAPOT: u8 = 3 << 3;
    pub const A_MASK: u8 = 3 << 3;
    /// Lock: also applies the entry to M-mode. The port never sets it.
    pub const L: u8 = 1 << 7;
}

pub const UNPRIVILEGED_FLASH_REGION: usize = 0;
pub const PRIVILEGED_FLASH_REGION: usize = 1;
pub const PRIVILEGED_RAM_REGION: usize = 2;
pub const GENERAL_PERIPHERALS_REGION: usize = 3;
pub const STACK_REGION: usize = 4;
pub const FIRST_CONFIGURABLE_REGION: usize = 5;
pub const LAST_CONFIGURABLE_REGION: usize = config::TOTAL_MPU_REGIONS - 1;
pub const NUM_CONFIGURABLE_REGIONS: usize = config::TOTAL_MPU_REGIONS - FIRST_CONFIGURABLE_REGION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// Length is neither 4 nor a power of two of at least 8 bytes.
    UnsupportedLength(usize),
    /// Base is not aligned to the region length.
    Misaligned { base: usize, length: usize },
    /// More caller regions than configurable slots.
    TooManyRegions { requested: usize, available: usize },
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedLength(length) => write!(f, "region length {length:#x} is not encodable"),
            Self::Misaligned { base, length } => {
                write!(f, "region base {base:#x} is not aligned to its length {length:#x}")
            }
            Self::TooManyRegions { requested, available } => {
                write!(f, "{requested} regions requested, {available} configurable")
            }
        }
    }
}

/// One PMP entry: `pmpaddr` value and `pmpcfg` byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionRegisters {
    pub base_address: usize,
    pub attribute: u8,
}

impl RegionRegisters {
    pub const DISABLED: Self = Self { base_address: 0, attribute: 0 };

    /// Encodes `[base, base + length)` with `permissions` for unprivileged code.
    pub fn encode(base: usize, length: usize, permissions: RegionPermissions) -> Result<Self, RegionError> {
        let (base_address, mode) = napot_encode(base, length)?;
        Ok(Self { base_address, attribute: mode | permission_bits(permissions) })
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.attribute & pmpcfg::A_MASK != pmpcfg::A_OFF
    }
}

fn permission_bits(permissions: RegionPermissions) -> u8 {
    let mut bits = 0;
    if permissions.contains(RegionPermissions::READ) {
        bits |= pmpcfg::R;
    }
    if permissions.contains(RegionPermissions::WRITE) {
        bits |= pmpcfg::W;
    }
    if permissions.contains(RegionPermissions::EXECUTE) {
        bits |= pmpcfg::X;
    }
    bits
}

/// Returns the `pmpaddr` value and address-matching mode for a naturally
/// aligned power-of-two region (NA4 for 4 bytes, NAPOT from 8 bytes up).
pub fn napot_encode(base: usize, length: usize) -> Result<(usize, u8), RegionError> {
    if length == 4 {
        if base % 4 != 0 {
            return Err(RegionError::Misaligned { base, length });
        }
        return Ok((base >> 2, pmpcfg::A_NA4));
    }
    if length < 8 || !length.is_power_of_two() {
        return Err(RegionError::UnsupportedLength(length));
    }
    if base & (length - 1) != 0 {
        return Err(RegionError::Misaligned { base, length });
    }
    Ok(((base >> 2) | ((length >> 3) - 1), pmpcfg::A_NAPOT))
}

/// Inverse of [`napot_encode`] for NAPOT entries: `(base, length)`.
///
/// `None` when the region is too large for a `usize` length.
pub fn napot_decode(pmpaddr: usize) -> Option<(usize, usize)> {
    let ones = pmpaddr.trailing_ones();
    let length = 1usize.checked_shl(ones + 3)?;
    let base = (pmpaddr & !((1usize << ones) - 1)) << 2;
    Some((base, length))
}

/// Half-open address span from the linker script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Image layout behind the reserved regions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionLayout {
    pub unprivileged_flash: Span,
    pub privileged_functions: Span,
    pub privileged_data: Span,
    pub peripherals: Span,
}

impl RegionLayout {
    #[cfg(all(target_arch = "riscv32", target_os = "none"))]
    pub fn linked() -> Self {
        extern "C" {
            static __unprivileged_flash_start__: u8;
            static __unprivileged_flash_end__: u8;
            static __privileged_functions_start__: u8;
            static __privileged_functions_end__: u8;
            static __privileged_data_start__: u8;
            static __privileged_data_end__: u8;
            static __peripherals_start__: u8;
            static __peripherals_end__: u8;
        }
        macro_rules! span {
            ($start:ident, $end:ident) => {
                // SAFETY: linker symbols; only their addresses are used.
                unsafe { Span::new(core::ptr::addr_of!($start) as usize, core::ptr::addr_of!($end) as usize) }
            };
        }
        Self {
            unprivileged_flash: span!(__unprivileged_flash_start__, __unprivileged_flash_end__),
            privileged_functions: span!(__privileged_functions_start__, __privileged_functions_end__),
            privileged_data: span!(__privileged_data_start__, __privileged_data_end__),
            peripherals: span!(__peripherals_start__, __peripherals_end__),
        }
    }
}

/// Protection region table stored in each task control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpuSettings {
    regions: [RegionRegisters; config::TOTAL_MPU_REGIONS],
}

impl Default for MpuSettings {
    fn default() -> Self {
        Self { regions: [RegionRegisters::DISABLED; config::TOTAL_MPU_REGIONS] }
    }
}

impl MpuSettings {
    pub fn regions(&self) -> &[RegionRegisters] {
        &self.regions
    }

    pub fn region(&self, index: usize) -> Option<&RegionRegisters> {
        self.regions.get(index)
    }

    /// `pmpcfg{index}` value carrying this table's attribute bytes.
    pub fn packed_cfg(&self, index: usize) -> usize {
        let first = index * PMP_ENTRIES_PER_CFG;
        self.regions
            .iter()
            .enumerate()
            .skip(first)
            .take(PMP_ENTRIES_PER_CFG)
            .fold(0, |acc, (entry, region)| {
                acc | (usize::from(region.attribute) << (8 * (entry - first)))
            })
    }

    /// Writes the table to the PMP.
    ///
    /// # Safety
    /// Changes what unprivileged code may touch. The caller holds the kernel
    /// critical section and is switching to the task owning this table.
    pub unsafe fn install<C: ControlRegisters>(&self, csrs: &C) {
        for index in 0..PMP_CFG_REGS {
            csrs.set_pmpcfg(index, 0);
        }
        for (entry, region) in self.regions.iter().enumerate() {
            csrs.set_pmpaddr(entry, region.base_address);
        }
        for index in 0..PMP_CFG_REGS {
            csrs.set_pmpcfg(index, self.packed_cfg(index));
        }
    }

    fn set_span(&mut self, index: usize, span: Span, permissions: RegionPermissions) -> Result<(), RegionError> {
        if span.is_empty() {
            return Ok(());
        }
        self.regions[index] = RegionRegisters::encode(span.start, span.len(), permissions)?;
        Ok(())
    }
}

/// Fills `settings` for a task: the reserved regions from `layout` and the
/// stack, then the caller's `regions` in the configurable slots.
///
/// Entries that cannot be encoded stay disabled; the first failure is
/// returned after every other entry has been written.
pub fn store_task_mpu_settings(
    settings: &mut MpuSettings,
    layout: &RegionLayout,
    regions: &[MemoryRegion],
    stack_bottom: *const usize,
    stack_depth: StackDepth,
) -> Result<(), RegionError> {
    *settings = MpuSettings::default();
    let mut first_error = None;
    let mut note = |result: Result<(), RegionError>| {
        if let Err(err) = result {
            first_error.get_or_insert(err);
        }
    };

    let none = RegionPermissions::empty();
    note(settings.set_span(
        UNPRIVILEGED_FLASH_REGION,
        layout.unprivileged_flash,
        RegionPermissions::READ | RegionPermissions::EXECUTE,
    ));
    // Matching entries without R/W/X deny user mode and leave machine mode alone.
    note(settings.set_span(PRIVILEGED_FLASH_REGION, layout.privileged_functions, none));
    note(settings.set_span(PRIVILEGED_RAM_REGION, layout.privileged_data, none));
    note(settings.set_span(GENERAL_PERIPHERALS_REGION, layout.peripherals, none));

    if !stack_bottom.is_null() && stack_depth != 0 {
        let start = stack_bottom as usize;
        let length = (stack_depth as usize).saturating_mul(config::WORD_SIZE);
        note(settings.set_span(
            STACK_REGION,
            Span::new(start, start.saturating_add(length)),
            RegionPermissions::READ | RegionPermissions::WRITE,
        ));
    }

    for (slot, region) in regions.iter().take(NUM_CONFIGURABLE_REGIONS).enumerate() {
        let span = Span::new(region.base, region.base.saturating_add(region.length));
        note(settings.set_span(FIRST_CONFIGURABLE_REGION + slot, span, region.permissions));
    }
    if regions.len() > NUM_CONFIGURABLE_REGIONS {
        note(Err(RegionError::TooManyRegions {
            requested: regions.len(),
            available: NUM_CONFIGURABLE_REGIONS,
        }));
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
