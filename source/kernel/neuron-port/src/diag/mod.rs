// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Diagnostics: leveled logging and fatal port assertions.

#[macro_use]
pub mod log;
#[macro_use]
pub mod assert;
