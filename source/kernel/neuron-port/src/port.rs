// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Scheduler start/stop for the RV32 port
//! OWNERS: @kernel-team
//! PUBLIC API: StartupError, check_startup_invariants(), prepare_scheduler(), start_scheduler() (RV32),
//!             end_scheduler(), ISR stack helpers
//! DEPENDS_ON: timer::setup_timer_interrupt, hal, diag
//! INVARIANTS: mtvec is in direct mode and the ISR stack top is 16-byte aligned before any
//!             interrupt source is enabled

use core::{
    cell::UnsafeCell,
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    config::{self, STACK_ALIGNMENT, WORD_SIZE},
    hal::{ControlRegisters, MachineTimer, MIE_MEIE, MIE_MTIE, MTVEC_MODE_MASK},
    timer,
};

/// Byte the static ISR stack is painted with.
pub const ISR_STACK_FILL_BYTE: u8 = 0xee;
/// Lowest bytes of the ISR stack checked for overflow.
pub const ISR_STACK_CHECK_BYTES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupError {
    /// `mtvec` selects vectored mode; the port installs a single handler.
    VectoredTrapMode { mtvec: usize },
    MisalignedIsrStack { top: usize },
    /// The guard bytes at the bottom of the ISR stack were overwritten.
    IsrStackCorrupted,
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VectoredTrapMode { mtvec } => write!(f, "mtvec {mtvec:#x} is not in direct mode"),
            Self::MisalignedIsrStack { top } => {
                write!(f, "ISR stack top {top:#x} is not {STACK_ALIGNMENT}-byte aligned")
            }
            Self::IsrStackCorrupted => write!(f, "ISR stack overflow"),
        }
    }
}

/// ISR stack top handed to the trap entry code.
#[no_mangle]
pub static PORT_ISR_STACK_TOP: AtomicUsize = AtomicUsize::new(0);

#[repr(C, align(16))]
struct IsrStack(UnsafeCell<[usize; config::ISR_STACK_SIZE_WORDS]>);

// SAFETY: painted once before the scheduler starts; afterwards only trap entry
// uses it as a stack.
unsafe impl Sync for IsrStack {}

static ISR_STACK: IsrStack = IsrStack(UnsafeCell::new([0; config::ISR_STACK_SIZE_WORDS]));

/// Top of the ISR stack: the static one when `ISR_STACK_SIZE_WORDS > 0`,
/// otherwise `__freertos_irq_stack_top` from the linker script.
pub fn isr_stack_top() -> Option<usize> {
    if config::ISR_STACK_SIZE_WORDS > 0 {
        let end = ISR_STACK.0.get() as usize + config::ISR_STACK_SIZE_WORDS * WORD_SIZE;
        return Some(end & !(STACK_ALIGNMENT - 1));
    }
    linked_isr_stack_top()
}

#[cfg(all(target_arch = "riscv32", target_os = "none"))]
fn linked_isr_stack_top() -> Option<usize> {
    extern "C" {
        static __freertos_irq_stack_top: u8;
    }
    // SAFETY: linker symbol; only its address is used.
    Some(unsafe { core::ptr::addr_of!(__freertos_irq_stack_top) } as usize)
}

#[cfg(not(all(target_arch = "riscv32", target_os = "none")))]
fn linked_isr_stack_top() -> Option<usize> {
    None
}

/// Paints `stack` with the fill byte.
pub fn fill_stack(stack: &mut [u8]) {
    stack.fill(ISR_STACK_FILL_BYTE);
}

/// Checks the guard bytes at the low end of a painted stack.
pub fn check_stack(stack: &[u8]) -> Result<(), StartupError> {
    let guard = &stack[..stack.len().min(ISR_STACK_CHECK_BYTES)];
    if guard.iter().all(|&byte| byte == ISR_STACK_FILL_BYTE) {
        Ok(())
    } else {
        Err(StartupError::IsrStackCorrupted)
    }
}

fn with_isr_stack<R>(f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
    if config::ISR_STACK_SIZE_WORDS == 0 {
        return None;
    }
    // SAFETY: the static stack is only viewed as bytes while no trap can use it
    // (before start) or by the guard check, which reads the far end.
    let bytes = unsafe {
        core::slice::from_raw_parts_mut(
            ISR_STACK.0.get().cast::<u8>(),
            config::ISR_STACK_SIZE_WORDS * WORD_SIZE,
        )
    };
    Some(f(bytes))
}

/// Verifies the static ISR stack guard. Builds using the linker-provided
/// stack always pass.
pub fn check_isr_stack() -> Result<(), StartupError> {
    with_isr_stack(|stack| check_stack(stack)).unwrap_or(Ok(()))
}

/// Kernel hook run on every context switch when stack checking is enabled.
#[no_mangle]
pub extern "C" fn port_check_isr_stack() {
    crate::port_assert!(ok: check_isr_stack());
}

pub fn check_startup_invariants<C: ControlRegisters>(csrs: &C, isr_stack_top: usize) -> Result<(), StartupError> {
    let mtvec = csrs.mtvec();
    if mtvec & MTVEC_MODE_MASK != 0 {
        return Err(StartupError::VectoredTrapMode { mtvec });
    }
    if isr_stack_top % STACK_ALIGNMENT != 0 {
        return Err(StartupError::MisalignedIsrStack { top: isr_stack_top });
    }
    Ok(())
}

/// `mie` bits enabled at start: external always, timer when the CLINT is in use.
pub const fn interrupt_sources() -> usize {
    if config::HAS_MTIME {
        MIE_MTIE | MIE_MEIE
    } else {
        MIE_MEIE
    }
}

/// Everything `start_scheduler` does before handing over to the first task.
pub fn prepare_scheduler<C: ControlRegisters, T: MachineTimer>(
    csrs: &C,
    timer_dev: &T,
    isr_stack_top: usize,
) -> Result<(), StartupError> {
    check_startup_invariants(csrs, isr_stack_top)?;
    with_isr_stack(fill_stack);
    PORT_ISR_STACK_TOP.store(isr_stack_top, Ordering::Release);
    timer::setup_timer_interrupt(csrs, timer_dev);
    csrs.enable_interrupt_sources(interrupt_sources());
    crate::log_info!(
        target: "port",
        "hart {} scheduler ready: tick={} counts mie={:#x}",
        csrs.hart_id(),
        config::TIMER_INCREMENTS_FOR_ONE_TICK,
        interrupt_sources()
    );
    Ok(())
}

/// Starts the scheduler on the calling hart. Startup invariant failures are fatal.
#[cfg(all(target_arch = "riscv32", target_os = "none"))]
pub fn start_scheduler() -> ! {
    use crate::hal::machine::{ClintTimer, Machine};

    extern "C" {
        fn port_start_first_task() -> !;
    }

    let top = isr_stack_top().unwrap_or(0);
    crate::port_assert!(ok: prepare_scheduler(&Machine, &ClintTimer::configured(), top));
    // SAFETY: kernel-provided; restores the first task's context and never returns.
    unsafe { port_start_first_task() }
}

/// Stopping the scheduler is not supported: the hart is parked.
pub fn end_scheduler() -> ! {
    crate::log_warn!(target: "port", "end_scheduler: not supported, parking hart");
    park()
}

/// Idles the hart forever.
pub fn park() -> ! {
    loop {
        #[cfg(all(target_arch = "riscv32", target_os = "none"))]
        crate::hal::machine::wait_for_interrupt();
        #[cfg(not(all(target_arch = "riscv32", target_os = "none")))]
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::soft::{SoftHart, SoftTimer};
    use std::vec;

    #[test]
    fn vectored_mtvec_is_rejected() {
        let hart = SoftHart::new();
        hart.set_mtvec(0x8000_0001);
        assert_eq!(
            check_startup_invariants(&hart, 0x8001_0000),
            Err(StartupError::VectoredTrapMode { mtvec: 0x8000_0001 })
        );
    }

    #[test]
    fn misaligned_isr_stack_is_rejected() {
        let hart = SoftHart::new();
        hart.set_mtvec(0x8000_0000);
        assert_eq!(
            check_startup_invariants(&hart, 0x8001_0008),
            Err(StartupError::MisalignedIsrStack { top: 0x8001_0008 })
        );
        assert!(check_startup_invariants(&hart, 0x8001_0010).is_ok());
    }

    #[test]
    fn guard_bytes_detect_overflow() {
        let mut stack = vec![0u8; 64];
        fill_stack(&mut stack);
        assert_eq!(check_stack(&stack), Ok(()));
        stack[ISR_STACK_CHECK_BYTES] = 0;
        assert_eq!(check_stack(&stack), Ok(()));
        stack[ISR_STACK_CHECK_BYTES - 1] = 0;
        assert_eq!(check_stack(&stack), Err(StartupError::IsrStackCorrupted));
    }

    #[test]
    fn prepare_enables_interrupt_sources() {
        let hart = SoftHart::with_hart_id(config::MAX_HARTS.saturating_sub(3));
        let timer = SoftTimer::new(0);
        assert_eq!(prepare_scheduler(&hart, &timer, 0x8001_0000), Ok(()));
        assert_eq!(hart.mie(), interrupt_sources());
        assert_eq!(hart.mie() & MIE_MEIE, MIE_MEIE);
        assert_eq!(PORT_ISR_STACK_TOP.load(Ordering::Acquire), 0x8001_0000);
    }

    #[cfg(not(feature = "external_tick"))]
    #[test]
    fn prepare_arms_the_tick() {
        let hart = SoftHart::with_hart_id(config::MAX_HARTS.saturating_sub(3));
        let timer = SoftTimer::new(40);
        assert_eq!(prepare_scheduler(&hart, &timer, 0x8001_0000), Ok(()));
        assert_eq!(
            timer.compare(hart.hart_id()),
            Some(40 + config::TIMER_INCREMENTS_FOR_ONE_TICK)
        );
    }

    #[cfg(feature = "external_tick")]
    static EXTERNAL_SETUPS: AtomicUsize = AtomicUsize::new(0);

    #[cfg(feature = "external_tick")]
    #[no_mangle]
    extern "C" fn port_setup_timer_interrupt() {
        EXTERNAL_SETUPS.fetch_add(1, Ordering::SeqCst);
    }

    #[cfg(feature = "external_tick")]
    #[test]
    fn prepare_defers_to_the_application_tick() {
        let hart = SoftHart::with_hart_id(config::MAX_HARTS.saturating_sub(3));
        let timer = SoftTimer::new(40);
        let before = EXTERNAL_SETUPS.load(Ordering::SeqCst);
        assert_eq!(prepare_scheduler(&hart, &timer, 0x8001_0000), Ok(()));
        assert!(EXTERNAL_SETUPS.load(Ordering::SeqCst) > before);
        assert_eq!(timer.compare(hart.hart_id()), None);
        assert_eq!(timer::next_expiry(hart.hart_id()), None);
        assert_eq!(hart.mie(), interrupt_sources());
    }

    #[test]
    fn prepare_stops_on_bad_mtvec() {
        let hart = SoftHart::new();
        hart.set_mtvec(0x3);
        let timer = SoftTimer::new(0);
        assert!(prepare_scheduler(&hart, &timer, 0x8001_0000).is_err());
        assert_eq!(hart.mie(), 0);
        assert_eq!(timer.compare(hart.hart_id()), None);
    }

    #[test]
    fn errors_render() {
        let text = std::format!("{}", StartupError::MisalignedIsrStack { top: 0x18 });
        assert!(text.contains("0x18"));
    }
}
