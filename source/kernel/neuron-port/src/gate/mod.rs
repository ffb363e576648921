// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Privilege gate wrapping kernel entry points for unprivileged tasks
//! OWNERS: @kernel-team
//! PUBLIC API: Token, PrivilegeGate, with_privilege(), Gated, EcallGate (RV32), SoftGate
//! DEPENDS_ON: syscall (RequestAccess/RemoveAccess), hal::soft for the host gate
//! INVARIANTS: Every raise is paired with exactly one reset on the same token; the caller's
//!             privilege state after reset equals the state before raise; the gate does not
//!             serialise callers (the kernel's own critical sections do)

pub mod api;

use crate::{
    hal::{soft::SoftHart, ControlRegisters},
    syscall::{self, GateRange, Syscall},
    trap::TrapFrame,
};

/// Privilege state captured by [`PrivilegeGate::raise`].
#[must_use = "a raised gate must be reset with its token"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// The caller was already in machine mode; reset is a no-op.
    AlreadyPrivileged,
    /// The gate performed (or attempted) the raise; reset drops to user mode.
    Raised,
}

impl Token {
    /// Decodes the a0 value returned by the `RequestAccess` syscall.
    #[inline]
    pub const fn from_access_result(a0: usize) -> Self {
        if a0 == syscall::ACCESS_ALREADY_PRIVILEGED {
            Self::AlreadyPrivileged
        } else {
            Self::Raised
        }
    }
}

/// Raise/reset pair executed around every gated kernel call.
pub trait PrivilegeGate {
    /// Enters machine mode, returning the previous state.
    fn raise(&self) -> Token;
    /// Restores the state captured in `token`.
    fn reset(&self, token: Token);
}

/// Runs `f` with the gate raised.
#[inline]
pub fn with_privilege<G: PrivilegeGate, R>(gate: &G, f: impl FnOnce() -> R) -> R {
    let token = gate.raise();
    let result = f();
    gate.reset(token);
    result
}

/// Kernel entry points `K` reached through gate `G`.
///
/// Implements [`api::KernelApi`] by delegating every call with
/// raise / call / reset.
pub struct Gated<K, G> {
    kernel: K,
    gate: G,
}

impl<K, G> Gated<K, G> {
    pub const fn new(kernel: K, gate: G) -> Self {
        Self { kernel, gate }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn gate(&self) -> &G {
        &self.gate
    }

    pub fn into_parts(self) -> (K, G) {
        (self.kernel, self.gate)
    }
}

/// Hardware gate: both halves live in `.syscalls_flash`, the only code
/// allowed to request machine mode.
#[cfg(all(target_arch = "riscv32", target_os = "none"))]
#[derive(Clone, Copy, Default)]
pub struct EcallGate;

#[cfg(all(target_arch = "riscv32", target_os = "none"))]
mod ecall {
    use core::arch::asm;

    use crate::syscall::Syscall;

    #[link_section = ".syscalls_flash"]
    #[inline(never)]
    pub(super) fn request_access() -> usize {
        let a0: usize;
        // SAFETY: the trap handler preserves every register but a0.
        unsafe {
            asm!("ecall", in("a7") Syscall::RequestAccess.id(), lateout("a0") a0, options(nostack));
        }
        a0
    }

    #[link_section = ".syscalls_flash"]
    #[inline(never)]
    pub(super) fn remove_access() {
        // SAFETY: as above; dropping privilege is always permitted.
        unsafe {
            asm!("ecall", in("a7") Syscall::RemoveAccess.id(), lateout("a0") _, options(nostack));
        }
    }
}

#[cfg(all(target_arch = "riscv32", target_os = "none"))]
impl PrivilegeGate for EcallGate {
    #[inline]
    fn raise(&self) -> Token {
        Token::from_access_result(ecall::request_access())
    }

    #[inline]
    fn reset(&self, token: Token) {
        if token == Token::Raised {
            ecall::remove_access();
        }
    }
}

/// Host gate driving the real dispatcher against a [`SoftHart`].
///
/// `call_site` is the address the emulated `ecall` traps from; placing it
/// outside `range` models a forged gate.
pub struct SoftGate<'a> {
    hart: &'a SoftHart,
    range: GateRange,
    call_site: usize,
}

impl<'a> SoftGate<'a> {
    pub const fn new(hart: &'a SoftHart, range: GateRange, call_site: usize) -> Self {
        Self { hart, range, call_site }
    }

    fn ecall(&self, pc: usize, request: Syscall) -> usize {
        self.hart.take_trap(pc);
        let mut frame = TrapFrame::default();
        frame.set_a7(request.id());
        let _ = syscall::dispatch(self.hart, &self.range, &mut frame);
        self.hart.mret();
        frame.a0()
    }
}

impl PrivilegeGate for SoftGate<'_> {
    fn raise(&self) -> Token {
        Token::from_access_result(self.ecall(self.call_site, Syscall::RequestAccess))
    }

    fn reset(&self, token: Token) {
        if token == Token::Raised {
            let _ = self.ecall(self.call_site + crate::config::ECALL_WIDTH, Syscall::RemoveAccess);
        }
    }
}
