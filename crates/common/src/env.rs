// ETrace - Execution Trace Builder
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Environment variable name constants for ETrace configuration.
//!
//! # Environment Variables
//!
//! ## Runtime Configuration
//! - [`ETRACE_ASSERT`] - Controls selective runtime assertion macros
//! - [`ETRACE_EVENT_TIMEOUT_MS`] - Bounded wait for the next debug event batch
//! - [`ETRACE_STEP_LIMIT`] - Hard ceiling on the number of recorded trace nodes
//! - [`ETRACE_VARIABLE_LAYER`] - Expansion depth of reference and array snapshots
//!
//! ## Testing
//! - [`ETRACE_PRINT_TRACE`] - Print assembled traces from integration tests

/// Environment variable for controlling selective runtime assertions.
///
/// Works like `RUST_LOG`: a comma separated list of module path prefixes whose
/// assertions are evaluated.
///
/// # Syntax
///
/// - `ETRACE_ASSERT=*` or `ETRACE_ASSERT=all` - Enable all assertions
/// - `ETRACE_ASSERT=etrace_engine` - Enable assertions in the engine crate and submodules
/// - `ETRACE_ASSERT=etrace_engine::call_stack,etrace_common::types` - Multiple targets
///
/// # Default
///
/// When not set or empty, all assertions are **disabled**.
///
/// # Related
///
/// See [`crate::macros`] for the assertion macros that use this variable.
pub const ETRACE_ASSERT: &str = "ETRACE_ASSERT";

/// Environment variable overriding the event wait timeout, in milliseconds.
///
/// Must be a valid `u64`. Invalid values are ignored.
///
/// ```bash
/// ETRACE_EVENT_TIMEOUT_MS=5000 cargo test
/// ```
pub const ETRACE_EVENT_TIMEOUT_MS: &str = "ETRACE_EVENT_TIMEOUT_MS";

/// Environment variable overriding the maximum number of trace nodes recorded in a run.
pub const ETRACE_STEP_LIMIT: &str = "ETRACE_STEP_LIMIT";

/// Environment variable overriding how many levels of object fields and array
/// elements are expanded when a reference value is snapshotted.
pub const ETRACE_VARIABLE_LAYER: &str = "ETRACE_VARIABLE_LAYER";

/// When set, integration tests print the invocation tree of every trace they build.
pub const ETRACE_PRINT_TRACE: &str = "ETRACE_PRINT_TRACE";
