// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fatal configuration assertions for the port's startup path.

/// Logs the failure at error level, then panics.
#[cold]
pub fn report_failure(args: core::fmt::Arguments<'_>) -> ! {
    crate::log_error!(target: "port", "assert: {}", args);
    panic!("port assert: {}", args);
}

/// Fails hard when the condition is false, or when a `Result` is `Err`.
#[macro_export]
macro_rules! port_assert {
    (ok: $result:expr $(,)?) => {
        if let Err(err) = $result {
            $crate::diag::assert::report_failure(format_args!("{}", err));
        }
    };
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::diag::assert::report_failure(format_args!(concat!("assertion failed: ", stringify!($cond))));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::diag::assert::report_failure(format_args!($($arg)+));
        }
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn holding_condition_is_silent() {
        port_assert!(1 + 1 == 2);
        port_assert!(ok: Ok::<(), &str>(()));
    }

    #[test]
    #[should_panic(expected = "port assert: mtvec")]
    fn failing_result_panics_with_error_text() {
        port_assert!(ok: Err::<(), &str>("mtvec"));
    }
}
