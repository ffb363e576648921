// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Machine trap classification for the port
//! OWNERS: @kernel-team
//! PUBLIC API: TrapFrame, KernelHooks, handle_trap(), TrapOutcome, describe_cause()
//! DEPENDS_ON: syscall::dispatch, timer::tick
//! INVARIANTS: ecall traps reach the dispatcher; the machine timer interrupt re-arms the hart's
//!             compare register before the kernel tick runs; nothing on this path logs

use core::fmt::{self, Write};

use crate::{
    hal::{ControlRegisters, MachineTimer},
    syscall::{self, Dispatch, GateRange},
    timer,
};

const INTERRUPT_FLAG: usize = usize::MAX - (usize::MAX >> 1);

const CAUSE_ECALL_FROM_U: usize = 8;
const CAUSE_ECALL_FROM_M: usize = 11;
const CAUSE_MACHINE_TIMER: usize = 7;

/// Register file saved by the trap entry stub.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// x0..x31 (x0 is always 0; we never write it).
    pub x: [usize; 32],
    pub mepc: usize,
    pub mstatus: usize,
    pub mcause: usize,
    pub mtval: usize,
}

impl TrapFrame {
    #[inline]
    pub fn a0(&self) -> usize {
        self.x[10]
    }

    #[inline]
    pub fn set_a0(&mut self, value: usize) {
        self.x[10] = value;
    }

    #[inline]
    pub fn a7(&self) -> usize {
        self.x[17]
    }

    #[inline]
    pub fn set_a7(&mut self, value: usize) {
        self.x[17] = value;
    }
}

/// Scheduler entry points the port calls from trap context.
pub trait KernelHooks {
    /// Advances the tick count; true when a context switch is due.
    fn increment_tick(&mut self) -> bool;
    /// Selects the next task to run.
    fn switch_context(&mut self);
}

/// What the trap exit path has to do.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Return to the interrupted context.
    Resume,
    /// The kernel selected a (possibly different) task; restore it.
    SwitchContext,
    /// Neither an ecall nor the machine timer; left to the application handler.
    Unhandled,
}

#[inline]
pub fn is_interrupt(mcause: usize) -> bool {
    mcause & INTERRUPT_FLAG != 0
}

/// Routes one machine trap.
pub fn handle_trap<C, T, H>(
    csrs: &C,
    timer_dev: &T,
    gate: &GateRange,
    frame: &mut TrapFrame,
    hooks: &mut H,
) -> TrapOutcome
where
    C: ControlRegisters,
    T: MachineTimer,
    H: KernelHooks,
{
    let code = frame.mcause & !INTERRUPT_FLAG;
    if is_interrupt(frame.mcause) {
        if code != CAUSE_MACHINE_TIMER {
            return TrapOutcome::Unhandled;
        }
        timer::tick(timer_dev, csrs.hart_id());
        if hooks.increment_tick() {
            hooks.switch_context();
            return TrapOutcome::SwitchContext;
        }
        return TrapOutcome::Resume;
    }

    match code {
        CAUSE_ECALL_FROM_U | CAUSE_ECALL_FROM_M => match syscall::dispatch(csrs, gate, frame) {
            Dispatch::Yield => {
                hooks.switch_context();
                TrapOutcome::SwitchContext
            }
            Dispatch::Resume => TrapOutcome::Resume,
        },
        _ => TrapOutcome::Unhandled,
    }
}

pub fn describe_cause(mcause: usize) -> &'static str {
    let code = mcause & (usize::MAX >> 1);
    if is_interrupt(mcause) {
        match code {
            3 => "MachineSoftInt",
            7 => "MachineTimerInt",
            11 => "MachineExternalInt",
            _ => "Interrupt",
        }
    } else {
        match code {
            0 => "InstructionAddressMisaligned",
            1 => "InstructionAccessFault",
            2 => "IllegalInstruction",
            3 => "Breakpoint",
            4 => "LoadAddressMisaligned",
            5 => "LoadAccessFault",
            6 => "StoreAMOAddressMisaligned",
            7 => "StoreAMOAccessFault",
            8 => "EnvironmentCallFromUMode",
            11 => "EnvironmentCallFromMMode",
            _ => "Exception",
        }
    }
}

pub fn fmt_trap<W: Write>(frame: &TrapFrame, f: &mut W) -> fmt::Result {
    writeln!(f, " mepc=0x{:08x}", frame.mepc)?;
    writeln!(f, " mcause=0x{:08x} ({})", frame.mcause, describe_cause(frame.mcause))?;
    writeln!(f, " mtval=0x{:08x}", frame.mtval)?;
    writeln!(f, " a0..a7 = {:08x?}", &frame.x[10..=17])
}

#[cfg(all(target_arch = "riscv32", target_os = "none"))]
mod linked {
    use super::{handle_trap, KernelHooks, TrapFrame, TrapOutcome};
    use crate::{
        hal::machine::{ClintTimer, Machine},
        syscall::GateRange,
    };

    extern "C" {
        fn kernel_increment_tick() -> usize;
        fn kernel_switch_context();
    }

    struct LinkedKernel;

    impl KernelHooks for LinkedKernel {
        fn increment_tick(&mut self) -> bool {
            // SAFETY: provided by the kernel; callable from the tick interrupt.
            unsafe { kernel_increment_tick() != 0 }
        }

        fn switch_context(&mut self) {
            // SAFETY: provided by the kernel; callable from trap context.
            unsafe { kernel_switch_context() }
        }
    }

    /// Rust half of the trap vector. Returns the [`TrapOutcome`] discriminant
    /// so the assembly epilogue can pick the restore path. The epilogue
    /// restores `mepc` and `mstatus` from the (possibly switched) frame.
    #[no_mangle]
    pub extern "C" fn port_handle_trap(frame: &mut TrapFrame) -> usize {
        let outcome = handle_trap(
            &Machine,
            &ClintTimer::configured(),
            &GateRange::linked(),
            frame,
            &mut LinkedKernel,
        );
        match outcome {
            TrapOutcome::Resume => 0,
            TrapOutcome::SwitchContext => 1,
            TrapOutcome::Unhandled => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config,
        hal::{
            soft::{SoftHart, SoftTimer},
            PrivilegeMode,
        },
        syscall::Syscall,
    };
    use std::string::String;

    #[derive(Default)]
    struct Kernel {
        ticks: u32,
        switches: u32,
        switch_every: u32,
    }

    impl KernelHooks for Kernel {
        fn increment_tick(&mut self) -> bool {
            self.ticks += 1;
            self.switch_every != 0 && self.ticks % self.switch_every == 0
        }

        fn switch_context(&mut self) {
            self.switches += 1;
        }
    }

    const GATE: GateRange = GateRange::new(0x100, 0x200);

    #[test]
    fn user_ecall_reaches_dispatcher() {
        let hart = SoftHart::new();
        let timer = SoftTimer::new(0);
        let mut kernel = Kernel::default();
        hart.set_mode(PrivilegeMode::User);
        hart.take_trap(0x104);
        let mut frame = TrapFrame { mcause: CAUSE_ECALL_FROM_U, ..TrapFrame::default() };
        frame.set_a7(Syscall::RequestAccess.id());
        assert_eq!(handle_trap(&hart, &timer, &GATE, &mut frame, &mut kernel), TrapOutcome::Resume);
        assert_eq!(hart.mepc(), 0x108);
        hart.mret();
        assert_eq!(hart.mode(), PrivilegeMode::Machine);
    }

    #[test]
    fn yield_runs_context_switch() {
        let hart = SoftHart::new();
        let timer = SoftTimer::new(0);
        let mut kernel = Kernel::default();
        hart.take_trap(0x900);
        let mut frame = TrapFrame { mcause: CAUSE_ECALL_FROM_M, ..TrapFrame::default() };
        frame.set_a7(Syscall::SelfYield.id());
        assert_eq!(
            handle_trap(&hart, &timer, &GATE, &mut frame, &mut kernel),
            TrapOutcome::SwitchContext
        );
        assert_eq!(kernel.switches, 1);
        assert_eq!(kernel.ticks, 0);
    }

    #[test]
    fn yielded_frame_resumes_past_the_ecall() {
        let hart = SoftHart::new();
        let timer = SoftTimer::new(0);
        let mut kernel = Kernel::default();
        hart.set_mode(PrivilegeMode::User);
        hart.take_trap(0x9000);
        let mut saved = TrapFrame { mcause: CAUSE_ECALL_FROM_U, ..TrapFrame::default() };
        saved.set_a7(Syscall::SelfYield.id());
        assert_eq!(
            handle_trap(&hart, &timer, &GATE, &mut saved, &mut kernel),
            TrapOutcome::SwitchContext
        );
        assert_eq!(saved.mepc, 0x9004);

        // Another task runs and traps in machine mode before the yielder is restored.
        hart.mret();
        hart.set_mode(PrivilegeMode::Machine);
        hart.take_trap(0x5000);

        hart.set_mepc(saved.mepc);
        hart.set_mstatus(saved.mstatus);
        hart.mret();
        assert_eq!(hart.mepc(), 0x9004);
        assert_eq!(hart.mode(), PrivilegeMode::User);
    }

    #[test]
    fn timer_interrupt_rearms_then_ticks() {
        let hart_id = config::MAX_HARTS - 1;
        let hart = SoftHart::with_hart_id(hart_id);
        let timer = SoftTimer::new(100_000);
        let hart_ref = hart.hart_id();
        timer::arm(&timer, hart_ref, 16_000);
        assert_eq!(timer.compare(hart_ref), Some(116_000));

        let mut kernel = Kernel { switch_every: 2, ..Kernel::default() };
        let mut frame = TrapFrame { mcause: INTERRUPT_FLAG | CAUSE_MACHINE_TIMER, ..TrapFrame::default() };
        assert_eq!(handle_trap(&hart, &timer, &GATE, &mut frame, &mut kernel), TrapOutcome::Resume);
        assert_eq!(timer.compare(hart_ref), Some(132_000));
        assert_eq!(
            handle_trap(&hart, &timer, &GATE, &mut frame, &mut kernel),
            TrapOutcome::SwitchContext
        );
        assert_eq!(timer.compare(hart_ref), Some(148_000));
        assert_eq!(kernel.ticks, 2);
    }

    #[test]
    fn other_causes_are_left_to_the_application() {
        let hart = SoftHart::new();
        let timer = SoftTimer::new(0);
        let mut kernel = Kernel::default();
        let mut frame = TrapFrame { mcause: INTERRUPT_FLAG | 11, ..TrapFrame::default() };
        assert_eq!(handle_trap(&hart, &timer, &GATE, &mut frame, &mut kernel), TrapOutcome::Unhandled);
        frame.mcause = 2;
        assert_eq!(handle_trap(&hart, &timer, &GATE, &mut frame, &mut kernel), TrapOutcome::Unhandled);
        assert_eq!(kernel.ticks, 0);
    }

    #[test]
    fn causes_have_names() {
        assert_eq!(describe_cause(CAUSE_ECALL_FROM_U), "EnvironmentCallFromUMode");
        assert_eq!(describe_cause(INTERRUPT_FLAG | 7), "MachineTimerInt");
        let frame = TrapFrame { mcause: 5, ..TrapFrame::default() };
        let mut out = String::new();
        assert!(fmt_trap(&frame, &mut out).is_ok());
        assert!(out.contains("LoadAccessFault"));
    }
}
