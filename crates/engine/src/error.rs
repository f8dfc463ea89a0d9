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

//! Error types of the trace-construction engine.
//!
//! Only [`EngineError`] escapes a run. [`EvalError`]s are produced while capturing
//! variables and are always absorbed: the variable is dropped from the step.

use std::time::Duration;

use thiserror::Error;

/// Fatal failure of a trace run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No event batch arrived within the configured bound
    #[error("no debug event received within {waited:?}")]
    Timeout {
        /// The bound that elapsed
        waited: Duration,
    },

    /// The debug session failed while delivering events or resuming the target
    #[error("debug session failed: {0}")]
    Session(#[from] eyre::Report),
}

/// Failure to evaluate a variable against a live stack frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The target carries no debug information for the frame
    #[error("absent debug information at {0}")]
    AbsentInformation(String),

    /// The variable is not visible at this point (out of scope, not yet assigned)
    #[error("`{0}` is not available in this frame")]
    NotAvailable(String),

    /// The expression could not be parsed or does not type check
    #[error("invalid expression `{expression}`: {reason}")]
    InvalidExpression {
        /// The expression
        expression: String,
        /// Why it was rejected
        reason: String,
    },

    /// The thread is not suspended, or the frame has been popped
    #[error("thread is not in a state that allows evaluation")]
    IncompatibleThreadState,

    /// No stack frame at the expected location
    #[error("no stack frame at {0}")]
    FrameNotFound(String),

    /// Evaluation ran target code that threw
    #[error("evaluation threw: {0}")]
    Invocation(String),
}
