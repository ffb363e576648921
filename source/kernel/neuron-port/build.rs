// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Generates `port_config.rs` from `NEURON_PORT_*` environment knobs.
//!
//! Configuration mistakes that would leave the port without a tick source or
//! without room for the reserved protection regions stop the build here.

use std::{env, fmt::Write as _, fs, path::PathBuf};

const DEFAULT_CPU_CLOCK_HZ: u64 = 10_000_000;
const DEFAULT_TICK_RATE_HZ: u64 = 1_000;
const DEFAULT_CLINT_BASE: u64 = 0x0200_0000;
const CLINT_MTIME_OFFSET: u64 = 0xBFF8;
const CLINT_MTIMECMP_OFFSET: u64 = 0x4000;
const DEFAULT_TOTAL_MPU_REGIONS: u64 = 8;
const DEFAULT_PMP_ENTRIES: u64 = 8;
const DEFAULT_MAX_HARTS: u64 = 4;
const RESERVED_REGIONS: u64 = 5;

const KNOBS: &[&str] = &[
    "NEURON_PORT_CPU_CLOCK_HZ",
    "NEURON_PORT_TICK_RATE_HZ",
    "NEURON_PORT_CLINT_BASE_ADDRESS",
    "NEURON_PORT_MTIME_BASE_ADDRESS",
    "NEURON_PORT_MTIMECMP_BASE_ADDRESS",
    "NEURON_PORT_TOTAL_MPU_REGIONS",
    "NEURON_PORT_PMP_ENTRIES",
    "NEURON_PORT_MAX_HARTS",
    "NEURON_PORT_ISR_STACK_SIZE_WORDS",
    "NEURON_PORT_LINKER_SCRIPT",
];

fn parse_number(name: &str, raw: &str) -> u64 {
    let raw = raw.trim().replace('_', "");
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse::<u64>(),
    };
    match parsed {
        Ok(value) => value,
        Err(err) => panic!("{name}={raw:?} is not a number: {err}"),
    }
}

fn knob(name: &str) -> Option<u64> {
    env::var(name).ok().map(|raw| parse_number(name, &raw))
}

fn main() {
    for name in KNOBS {
        println!("cargo:rerun-if-env-changed={name}");
    }
    if let Ok(script) = env::var("NEURON_PORT_LINKER_SCRIPT") {
        println!("cargo:rustc-link-arg=-T{script}");
    }

    let external_tick = env::var_os("CARGO_FEATURE_EXTERNAL_TICK").is_some();

    let cpu_clock_hz = knob("NEURON_PORT_CPU_CLOCK_HZ").unwrap_or(DEFAULT_CPU_CLOCK_HZ);
    let tick_rate_hz = knob("NEURON_PORT_TICK_RATE_HZ").unwrap_or(DEFAULT_TICK_RATE_HZ);
    if cpu_clock_hz == 0 || tick_rate_hz == 0 {
        panic!("NEURON_PORT_CPU_CLOCK_HZ and NEURON_PORT_TICK_RATE_HZ must be non-zero");
    }
    if cpu_clock_hz / tick_rate_hz == 0 {
        panic!("tick rate {tick_rate_hz} Hz exceeds the timer clock {cpu_clock_hz} Hz");
    }
    if cpu_clock_hz / tick_rate_hz > u64::from(u32::MAX) {
        panic!("one tick ({} counts) does not fit in 32 bits", cpu_clock_hz / tick_rate_hz);
    }

    // Legacy single CLINT base: derive both timer addresses from it unless the
    // explicit addresses are given.
    let clint = knob("NEURON_PORT_CLINT_BASE_ADDRESS");
    if clint.is_some() {
        println!(
            "cargo:warning=NEURON_PORT_CLINT_BASE_ADDRESS is deprecated; set \
             NEURON_PORT_MTIME_BASE_ADDRESS and NEURON_PORT_MTIMECMP_BASE_ADDRESS instead"
        );
    }
    let (mtime_default, mtimecmp_default) = match clint {
        Some(0) => (0, 0),
        Some(base) => (base + CLINT_MTIME_OFFSET, base + CLINT_MTIMECMP_OFFSET),
        None => (DEFAULT_CLINT_BASE + CLINT_MTIME_OFFSET, DEFAULT_CLINT_BASE + CLINT_MTIMECMP_OFFSET),
    };
    let mtime = knob("NEURON_PORT_MTIME_BASE_ADDRESS").unwrap_or(mtime_default);
    let mtimecmp = knob("NEURON_PORT_MTIMECMP_BASE_ADDRESS").unwrap_or(mtimecmp_default);
    if (mtime == 0 || mtimecmp == 0) && !external_tick {
        panic!(
            "no tick source: set NEURON_PORT_MTIME_BASE_ADDRESS and \
             NEURON_PORT_MTIMECMP_BASE_ADDRESS, or enable the `external_tick` feature and \
             provide port_setup_timer_interrupt"
        );
    }

    let total_regions = knob("NEURON_PORT_TOTAL_MPU_REGIONS").unwrap_or(DEFAULT_TOTAL_MPU_REGIONS);
    if total_regions < RESERVED_REGIONS {
        panic!(
            "NEURON_PORT_TOTAL_MPU_REGIONS={total_regions}: at least {RESERVED_REGIONS} regions \
             are reserved by the port"
        );
    }
    let pmp_entries = knob("NEURON_PORT_PMP_ENTRIES").unwrap_or(DEFAULT_PMP_ENTRIES);
    if pmp_entries == 0 || pmp_entries > 16 || pmp_entries % 4 != 0 {
        panic!("NEURON_PORT_PMP_ENTRIES={pmp_entries}: expected 4, 8, 12 or 16");
    }
    if total_regions > pmp_entries {
        panic!("NEURON_PORT_TOTAL_MPU_REGIONS={total_regions} exceeds {pmp_entries} PMP entries");
    }
    let max_harts = knob("NEURON_PORT_MAX_HARTS").unwrap_or(DEFAULT_MAX_HARTS);
    if max_harts == 0 {
        panic!("NEURON_PORT_MAX_HARTS must be at least 1");
    }
    let isr_stack_words = knob("NEURON_PORT_ISR_STACK_SIZE_WORDS").unwrap_or(0);

    let mut out = String::new();
    let _ = writeln!(out, "// @generated by build.rs from NEURON_PORT_* environment knobs.");
    let _ = writeln!(out, "pub const CPU_CLOCK_HZ: u64 = {cpu_clock_hz};");
    let _ = writeln!(out, "pub const TICK_RATE_HZ: u64 = {tick_rate_hz};");
    let _ = writeln!(out, "pub const MTIME_BASE_ADDRESS: usize = {mtime:#x};");
    let _ = writeln!(out, "pub const MTIMECMP_BASE_ADDRESS: usize = {mtimecmp:#x};");
    let _ = writeln!(out, "pub const TOTAL_MPU_REGIONS: usize = {total_regions};");
    let _ = writeln!(out, "pub const PMP_ENTRIES: usize = {pmp_entries};");
    let _ = writeln!(out, "pub const MAX_HARTS: usize = {max_harts};");
    let _ = writeln!(out, "pub const ISR_STACK_SIZE_WORDS: usize = {isr_stack_words};");

    let dest = PathBuf::from(env::var("OUT_DIR").expect("cargo sets OUT_DIR")).join("port_config.rs");
    fs::write(&dest, out).expect("write port_config.rs");
}
