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

//! Path-gated runtime assertion macros
//!
//! Trace invariants (gapless node order, call-tree ordering, step-over pairing) are
//! cheap to state but not free to check on every event. The macros in this module
//! are compiled in everywhere and only evaluated for module paths selected through
//! the [`ETRACE_ASSERT`](crate::env::ETRACE_ASSERT) environment variable.
//!
//! ```bash
//! # Check every invariant
//! ETRACE_ASSERT=* cargo test
//!
//! # Only the trace aggregate and the call-stack tracker
//! ETRACE_ASSERT=etrace_common::types,etrace_engine::call_stack cargo test
//! ```
//!
//! ```ignore
//! use etrace_common::{etrace_assert, etrace_assert_eq};
//!
//! etrace_assert!(order > 0, "trace orders are 1-indexed");
//! etrace_assert_eq!(node.order, trace.len());
//! ```

use once_cell::sync::Lazy;
use std::env;

use crate::env::ETRACE_ASSERT;

/// Assertion targets parsed once from `ETRACE_ASSERT`.
static ASSERTION_TARGETS: Lazy<Vec<String>> =
    Lazy::new(|| env::var(ETRACE_ASSERT).map(|val| parse_targets(&val)).unwrap_or_default());

/// Split a comma separated target list, dropping blanks.
pub fn parse_targets(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

/// Whether `module_path` is selected by any of `targets`.
///
/// `*` and `all` select everything; any other target selects the module paths it prefixes.
pub fn matches_targets(targets: &[String], module_path: &str) -> bool {
    targets
        .iter()
        .any(|target| target == "*" || target == "all" || module_path.starts_with(target.as_str()))
}

/// Check if assertions are enabled for the given module path (typically `module_path!()`).
pub fn is_assertion_enabled(module_path: &str) -> bool {
    !ASSERTION_TARGETS.is_empty() && matches_targets(&ASSERTION_TARGETS, module_path)
}

/// Marks the assertion branch as unlikely.
#[cold]
#[inline(never)]
pub fn cold_path() {}

/// Assert a condition only when enabled via `ETRACE_ASSERT`.
#[macro_export]
macro_rules! etrace_assert {
    ($($arg:tt)*) => {
        if $crate::macros::is_assertion_enabled(module_path!()) {
            $crate::macros::cold_path();
            assert!($($arg)*);
        }
    };
}

/// Assert two expressions are equal only when enabled via `ETRACE_ASSERT`.
#[macro_export]
macro_rules! etrace_assert_eq {
    ($($arg:tt)*) => {
        if $crate::macros::is_assertion_enabled(module_path!()) {
            $crate::macros::cold_path();
            assert_eq!($($arg)*);
        }
    };
}

/// Debug-build-only variant of [`etrace_assert!`].
#[macro_export]
macro_rules! etrace_debug_assert {
    ($($arg:tt)*) => {
        #[cfg(debug_assertions)]
        {
            $crate::etrace_assert!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        assert_eq!(
            parse_targets(" etrace_engine , ,etrace_common::types"),
            vec!["etrace_engine".to_string(), "etrace_common::types".to_string()]
        );
        assert!(parse_targets("").is_empty());
    }

    #[test]
    fn test_matches_targets() {
        let wildcard = parse_targets("*");
        assert!(matches_targets(&wildcard, "anything::at::all"));

        let targets = parse_targets("etrace_engine::call_stack,etrace_common::types");
        assert!(matches_targets(&targets, "etrace_engine::call_stack"));
        assert!(matches_targets(&targets, "etrace_common::types::trace"));
        assert!(!matches_targets(&targets, "etrace_engine::capture"));

        assert!(!matches_targets(&[], "etrace_engine"));
    }

    #[test]
    fn test_macros_accept_true_conditions() {
        // No-ops unless ETRACE_ASSERT selects this module; must never panic either way.
        etrace_assert!(1 + 1 == 2);
        etrace_assert!(true, "with message {}", 1);
        etrace_assert_eq!(3, 3);
        etrace_debug_assert!(!false);
    }
}
