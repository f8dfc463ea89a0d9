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

//! Execution trace data model.
//!
//! A [`Trace`] owns the 1-indexed sequence of [`TraceNode`]s recorded for a run
//! together with the [`DataRelationTable`] that maps every variable identity to
//! the nodes that produced and consumed it.

mod breakpoint;
pub use breakpoint::*;

mod location;
pub use location::*;

mod node;
pub use node::*;

mod relation;
pub use relation::*;

mod trace;
pub use trace::*;

mod value;
pub use value::*;

mod variable;
pub use variable::*;
