// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Build-time port configuration
//! OWNERS: @kernel-arch-team
//! PUBLIC API: CPU_CLOCK_HZ, TICK_RATE_HZ, MTIME/MTIMECMP base addresses, region/PMP/hart counts
//! DEPENDS_ON: build.rs (`$OUT_DIR/port_config.rs`)
//! INVARIANTS: Values are fixed per build; inconsistent combinations fail to compile

mod generated {
    include!(concat!(env!("OUT_DIR"), "/port_config.rs"));
}

pub use generated::{
    CPU_CLOCK_HZ, ISR_STACK_SIZE_WORDS, MAX_HARTS, MTIMECMP_BASE_ADDRESS, MTIME_BASE_ADDRESS,
    PMP_ENTRIES, TICK_RATE_HZ, TOTAL_MPU_REGIONS,
};

/// Required stack alignment in bytes (RISC-V psABI).
pub const STACK_ALIGNMENT: usize = 16;

/// Machine word size in bytes.
pub const WORD_SIZE: usize = core::mem::size_of::<usize>();

/// Width of the `ecall` instruction; trap return addresses advance by this much.
pub const ECALL_WIDTH: usize = 4;

/// Number of timer counts in one scheduler tick.
#[inline]
pub const fn tick_increment(clock_hz: u64, tick_rate_hz: u64) -> u64 {
    clock_hz / tick_rate_hz
}

/// Timer counts per tick for this build.
pub const TIMER_INCREMENTS_FOR_ONE_TICK: u64 = tick_increment(CPU_CLOCK_HZ, TICK_RATE_HZ);

/// True when the default CLINT tick source can be used.
pub const HAS_MTIME: bool = MTIME_BASE_ADDRESS != 0 && MTIMECMP_BASE_ADDRESS != 0;

const _: () = assert!(TICK_RATE_HZ != 0, "tick rate must be non-zero");
const _: () = assert!(TIMER_INCREMENTS_FOR_ONE_TICK != 0, "tick rate exceeds the timer clock");
const _: () = assert!(
    TIMER_INCREMENTS_FOR_ONE_TICK <= u32::MAX as u64,
    "one tick must fit in 32 bits"
);
const _: () = assert!(
    HAS_MTIME || cfg!(feature = "external_tick"),
    "no tick source: configure MTIME/MTIMECMP or enable `external_tick`"
);
const _: () = assert!(TOTAL_MPU_REGIONS >= 5, "five protection regions are reserved");
const _: () = assert!(TOTAL_MPU_REGIONS <= PMP_ENTRIES, "more regions than PMP entries");
const _: () = assert!(MAX_HARTS >= 1);
