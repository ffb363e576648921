// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: RV32 machine/user port layer for a preemptive kernel with PMP task isolation
//! OWNERS: @kernel-team @kernel-arch-team
//! PUBLIC API: gate (privilege gate + generated kernel wrappers), syscall (trap-time dispatcher),
//!             bootstrap (drop to user mode), context (PMP context extension), timer (tick arming),
//!             mpu (per-task regions), port (scheduler start), trap (trap classification)
//! DEPENDS_ON: riscv, spin, bitflags, static_assertions
//! INVARIANTS: Only code in the gate range can obtain machine mode from user mode;
//!             every hardware access goes through hal::ControlRegisters / hal::MachineTimer

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

#[macro_use]
pub mod diag;

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod gate;
pub mod hal;
pub mod mpu;
pub mod port;
pub mod syscall;
pub mod timer;
pub mod trap;
pub mod types;

#[cfg(all(feature = "panic_handler", not(test)))]
mod panic;

pub use gate::{api::KernelApi, with_privilege, Gated, PrivilegeGate, Token};
pub use syscall::{GateRange, Syscall};
