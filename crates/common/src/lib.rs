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

//! ETrace Common - Shared functionality for ETrace components
//!
//! This crate provides the execution trace data model shared by the trace
//! construction engine and its consumers, together with the ambient utilities
//! (logging, environment variables, runtime assertions) every ETrace crate uses.

/// Execution trace data model: nodes, variables, values, breakpoints and data relations
pub mod types;

/// Environment variable names recognised by ETrace
pub mod env;
/// Logging setup and utilities for consistent logging across ETrace components
pub mod logging;
/// Path-gated runtime assertion macros
pub mod macros;

pub use env::*;
pub use logging::*;
