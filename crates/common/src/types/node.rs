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

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{BreakPoint, VarValue};

/// One runtime occurrence of an interesting location.
///
/// Nodes are addressed by their `order` (1-based position in the trace). All links
/// between nodes are stored as orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceNode {
    /// Position in execution order, starting at 1
    pub order: usize,
    /// Static location this node is an occurrence of
    pub breakpoint: Arc<BreakPoint>,
    /// Variables read at this step
    pub read_variables: Vec<VarValue>,
    /// Variables written by this step
    pub written_variables: Vec<VarValue>,
    /// Parameter values this node received on method entry (set on the first node of a callee)
    pub pass_parameters: Vec<VarValue>,
    /// Values returned from this node's method when the node is not a declared return statement
    pub returned_variables: Vec<VarValue>,
    /// Whether an exception was thrown while executing this step
    pub exception: bool,
    /// Previous node in execution order
    pub step_in_prev: Option<usize>,
    /// Next node in execution order
    pub step_in_next: Option<usize>,
    /// Call site whose invocation this node runs in
    pub invocation_parent: Option<usize>,
    /// Nodes executed directly inside the invocation started at this node, in order
    pub invocation_children: Vec<usize>,
    /// For a step that just returned from a call: the call site
    pub step_over_prev: Option<usize>,
    /// For a call site: the first step after the call returned
    pub step_over_next: Option<usize>,
}

impl TraceNode {
    /// Create an unlinked node
    pub fn new(order: usize, breakpoint: Arc<BreakPoint>) -> Self {
        Self {
            order,
            breakpoint,
            read_variables: Vec::new(),
            written_variables: Vec::new(),
            pass_parameters: Vec::new(),
            returned_variables: Vec::new(),
            exception: false,
            step_in_prev: None,
            step_in_next: None,
            invocation_parent: None,
            invocation_children: Vec::new(),
            step_over_prev: None,
            step_over_next: None,
        }
    }

    /// Class of the breakpoint
    pub fn class_name(&self) -> &str {
        &self.breakpoint.class_name
    }

    /// Compilation unit of the breakpoint
    pub fn declaring_unit(&self) -> &str {
        &self.breakpoint.declaring_unit
    }

    /// Source line of the breakpoint
    pub fn line(&self) -> usize {
        self.breakpoint.line
    }

    /// Whether `var_id` is already among the read variables
    pub fn reads(&self, var_id: &str) -> bool {
        self.read_variables.iter().any(|v| v.var_id == var_id)
    }

    /// Whether `var_id` is already among the written variables
    pub fn writes(&self, var_id: &str) -> bool {
        self.written_variables.iter().any(|v| v.var_id == var_id)
    }
}
