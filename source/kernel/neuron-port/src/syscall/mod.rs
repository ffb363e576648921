// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Trap-time syscall dispatcher and privilege adjustment
//! OWNERS: @kernel-team
//! PUBLIC API: Syscall, GateRange, dispatch(), Dispatch, return_to()
//! DEPENDS_ON: hal::ControlRegisters, trap::TrapFrame
//! INVARIANTS: Entered only from the ecall trap; machine mode is granted only to ecall sites inside
//!             the gate range; denial is silent and returns the caller's current level;
//!             mepc always advances by ECALL_WIDTH; never blocks, logs or enters the scheduler

#[cfg(test)]
mod tests_prop;

use core::fmt;

use crate::{
    config::ECALL_WIDTH,
    hal::{ControlRegisters, Mstatus, PrivilegeMode},
    trap::TrapFrame,
};

/// Value returned in a0 by `RequestAccess` when the caller already ran in machine mode.
pub const ACCESS_ALREADY_PRIVILEGED: usize = 1;
/// Value returned in a0 by `RequestAccess` to a user-mode caller (raised, or silently denied).
pub const ACCESS_RAISED: usize = 0;

/// Closed set of requests carried in a7. Ids are part of the trap ABI.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    /// Used by the kernel's yield primitive.
    SelfYield = 0,
    EnableMachineInterrupts = 1,
    DisableMachineInterrupts = 2,
    /// Raise to machine mode (gate only).
    RequestAccess = 3,
    /// Return to user mode.
    RemoveAccess = 4,
}

impl Syscall {
    pub const ALL: [Self; 5] = [
        Self::SelfYield,
        Self::EnableMachineInterrupts,
        Self::DisableMachineInterrupts,
        Self::RequestAccess,
        Self::RemoveAccess,
    ];

    #[inline]
    pub const fn from_raw(raw: usize) -> Option<Self> {
        match raw {
            0 => Some(Self::SelfYield),
            1 => Some(Self::EnableMachineInterrupts),
            2 => Some(Self::DisableMachineInterrupts),
            3 => Some(Self::RequestAccess),
            4 => Some(Self::RemoveAccess),
            _ => None,
        }
    }

    #[inline]
    pub const fn id(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Code region whose ecall sites may request machine mode: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateRange {
    start: usize,
    end: usize,
}

impl GateRange {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Range bounded by `__syscalls_flash_start__` / `__syscalls_flash_end__`.
    #[cfg(all(target_arch = "riscv32", target_os = "none"))]
    pub fn linked() -> Self {
        extern "C" {
            static __syscalls_flash_start__: u8;
            static __syscalls_flash_end__: u8;
        }
        // SAFETY: only the symbol addresses are taken, never their contents.
        unsafe {
            Self::new(
                core::ptr::addr_of!(__syscalls_flash_start__) as usize,
                core::ptr::addr_of!(__syscalls_flash_end__) as usize,
            )
        }
    }

    #[inline]
    pub const fn start(&self) -> usize {
        self.start
    }

    #[inline]
    pub const fn end(&self) -> usize {
        self.end
    }

    #[inline]
    pub const fn contains(&self, address: usize) -> bool {
        address >= self.start && address < self.end
    }
}

/// What the trap path has to do after the dispatcher returns.
#[must_use = "a yield request must reach the context switch"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Return to the caller (`mret`).
    Resume,
    /// Run the scheduler's context switch before returning.
    Yield,
}

/// Rewrites the previous-mode bits of `mstatus` so that `mret` lands in `mode`.
///
/// `MPIE` receives `context_mie`, the machine interrupt enable of the context
/// being returned to, and `UPIE` receives the live `UIE`.
#[inline]
pub fn return_to(mstatus: usize, mode: PrivilegeMode, context_mie: bool) -> usize {
    let mut status = Mstatus::from_bits_retain(mstatus);
    status.remove(Mstatus::MPP);
    status.insert(Mstatus::from_bits_retain(mode.mpp_bits()));
    status.set(Mstatus::MPIE, context_mie);
    let uie = status.contains(Mstatus::UIE);
    status.set(Mstatus::UPIE, uie);
    status.bits()
}

/// Handles an ecall trap. `mepc` still points at the ecall instruction.
///
/// The resulting `mepc` and `mstatus` are written to the CSRs and mirrored
/// into `frame`, so an epilogue that restores either from the saved frame
/// (after a context switch, for instance) resumes past the ecall with the
/// adjusted privilege.
pub fn dispatch<C: ControlRegisters>(csrs: &C, gate: &GateRange, frame: &mut TrapFrame) -> Dispatch {
    let mepc = csrs.mepc();
    let mut mstatus = csrs.mstatus();
    // Hardware stashed the trapped context's MIE in MPIE on entry.
    let context_mie = mstatus & Mstatus::MPIE.bits() != 0;
    let previous = PrivilegeMode::from_mpp(mstatus);

    let outcome = match Syscall::from_raw(frame.a7()) {
        Some(Syscall::SelfYield) => Dispatch::Yield,
        Some(Syscall::EnableMachineInterrupts) => {
            mstatus |= Mstatus::MPIE.bits();
            Dispatch::Resume
        }
        Some(Syscall::DisableMachineInterrupts) => {
            mstatus &= !Mstatus::MPIE.bits();
            Dispatch::Resume
        }
        Some(Syscall::RequestAccess) => {
            if gate.contains(mepc) {
                mstatus = return_to(mstatus, PrivilegeMode::Machine, context_mie);
            }
            // A denied machine-mode caller keeps its privilege, so its token
            // must not drop it on reset.
            frame.set_a0(match previous {
                PrivilegeMode::Machine => ACCESS_ALREADY_PRIVILEGED,
                PrivilegeMode::User => ACCESS_RAISED,
            });
            Dispatch::Resume
        }
        Some(Syscall::RemoveAccess) => {
            mstatus = return_to(mstatus, PrivilegeMode::User, context_mie);
            Dispatch::Resume
        }
        None => Dispatch::Resume,
    };

    let resume_at = mepc.wrapping_add(ECALL_WIDTH);
    csrs.set_mstatus(mstatus);
    csrs.set_mepc(resume_at);
    frame.mstatus = mstatus;
    frame.mepc = resume_at;
    outcome
}
