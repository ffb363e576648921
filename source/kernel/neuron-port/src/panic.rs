// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Opt-in panic handler for kernel images built on this port
//! OWNERS: @kernel-team
//! PUBLIC API: panic handler (no_std, `panic_handler` feature)
//! DEPENDS_ON: diag::log::emit_panic, port::park
//! INVARIANTS: No allocation; never blocks on the log sink; parks the hart

use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    crate::diag::log::emit_panic(format_args!("{}", info));
    crate::port::park()
}
