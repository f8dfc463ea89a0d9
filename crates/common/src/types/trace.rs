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

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{etrace_assert, etrace_assert_eq};

use super::{Access, BreakPoint, DataRelationTable, StepVariableRelationEntry, TraceNode, VarValue};

/// The execution trace of one run: an append-only, 1-indexed sequence of
/// [`TraceNode`]s plus the [`DataRelationTable`].
///
/// The trace is only mutated by the engine while it is being constructed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    nodes: Vec<TraceNode>,
    relations: DataRelationTable,
    /// Latest producer order per identity prefix (the identity without its defining-order suffix)
    #[serde(skip)]
    latest_writers: HashMap<String, usize>,
}

impl Trace {
    /// Create a new empty trace
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert trace to serde_json::Value for serialization
    pub fn to_json_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node has been recorded
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in execution order
    pub fn nodes(&self) -> &[TraceNode] {
        &self.nodes
    }

    /// Iterate nodes in execution order
    pub fn iter(&self) -> std::slice::Iter<'_, TraceNode> {
        self.nodes.iter()
    }

    /// Node with the given 1-based order
    pub fn node(&self, order: usize) -> Option<&TraceNode> {
        order.checked_sub(1).and_then(|idx| self.nodes.get(idx))
    }

    /// Mutable node with the given 1-based order
    pub fn node_mut(&mut self, order: usize) -> Option<&mut TraceNode> {
        order.checked_sub(1).and_then(|idx| self.nodes.get_mut(idx))
    }

    /// The most recently recorded node
    pub fn latest_node(&self) -> Option<&TraceNode> {
        self.nodes.last()
    }

    /// Order of the most recently recorded node
    pub fn latest_order(&self) -> Option<usize> {
        self.nodes.last().map(|node| node.order)
    }

    /// The data relation table
    pub fn relations(&self) -> &DataRelationTable {
        &self.relations
    }

    /// Mutable access to the data relation table
    pub fn relations_mut(&mut self) -> &mut DataRelationTable {
        &mut self.relations
    }

    /// Relation entry of an identity
    pub fn relation(&self, var_id: &str) -> Option<&StepVariableRelationEntry> {
        self.relations.get(var_id)
    }

    /// Orders of the nodes that wrote `var_id`
    pub fn producers_of(&self, var_id: &str) -> Vec<usize> {
        self.relation(var_id).map(|e| e.producers.iter().copied().collect()).unwrap_or_default()
    }

    /// Orders of the nodes that read `var_id`
    pub fn consumers_of(&self, var_id: &str) -> Vec<usize> {
        self.relation(var_id).map(|e| e.consumers.iter().copied().collect()).unwrap_or_default()
    }

    /// Invocation children of a node
    pub fn children_of(&self, order: usize) -> Vec<&TraceNode> {
        self.node(order)
            .map(|node| {
                node.invocation_children.iter().filter_map(|&child| self.node(child)).collect()
            })
            .unwrap_or_default()
    }

    /// Number of invocation ancestors of a node
    pub fn depth_of(&self, order: usize) -> usize {
        let mut depth = 0;
        let mut current = self.node(order).and_then(|n| n.invocation_parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.node(parent).and_then(|n| n.invocation_parent);
        }
        depth
    }

    /// The latest node flagged as having thrown an exception
    pub fn find_latest_exception_node(&self) -> Option<&TraceNode> {
        self.nodes.iter().rev().find(|node| node.exception)
    }
}

// Construction, used by the engine while events are consumed.
impl Trace {
    /// Append a node for `breakpoint` and link it into the step-in chain.
    ///
    /// Returns the order of the new node.
    pub fn append_node(&mut self, breakpoint: Arc<BreakPoint>) -> usize {
        let order = self.nodes.len() + 1;
        let mut node = TraceNode::new(order, breakpoint);

        if let Some(prev) = self.nodes.last_mut() {
            prev.step_in_next = Some(order);
            node.step_in_prev = Some(prev.order);
        }

        self.nodes.push(node);
        etrace_assert_eq!(self.nodes[order - 1].order, order, "trace order must be gapless");
        order
    }

    /// Attach `child` as the latest invocation child of `parent`.
    pub fn add_invocation_child(&mut self, parent: usize, child: usize) {
        let Some(parent_node) = self.node_mut(parent) else {
            return;
        };
        etrace_assert!(
            parent_node.invocation_children.last().is_none_or(|&last| last < child),
            "invocation children must be appended in execution order"
        );
        parent_node.invocation_children.push(child);

        if let Some(child_node) = self.node_mut(child) {
            child_node.invocation_parent = Some(parent);
        }
    }

    /// Link a call site to the first step after its call returned.
    pub fn link_step_over(&mut self, call_site: usize, after: usize) {
        etrace_assert!(call_site < after, "step-over links go forward in time");
        if let Some(node) = self.node_mut(call_site) {
            node.step_over_next = Some(after);
        }
        if let Some(node) = self.node_mut(after) {
            node.step_over_prev = Some(call_site);
        }
    }

    /// Flag a node as having thrown an exception
    pub fn mark_exception(&mut self, order: usize) {
        if let Some(node) = self.node_mut(order) {
            node.exception = true;
        }
    }

    /// Defining-order suffix for an identity prefix accessed at node `order`.
    ///
    /// A write defines a new generation at `order` itself. A read refers to the latest
    /// node that wrote the prefix, or `0` when the prefix is free (never written in the
    /// trace, e.g. a parameter or a field initialised before recording started).
    pub fn defining_order(&mut self, access: Access, prefix: &str, order: usize) -> usize {
        match access {
            Access::Written => {
                self.latest_writers.insert(prefix.to_string(), order);
                order
            }
            Access::Read => self.latest_writers.get(prefix).copied().unwrap_or(0),
        }
    }

    /// Add a read variable to node `order` and register it as a consumer.
    pub fn add_read_variable(&mut self, order: usize, value: VarValue) {
        self.relations.add_consumer(&value.var_id, &value.variable, order);
        if let Some(node) = self.node_mut(order) {
            if !node.reads(&value.var_id) {
                node.read_variables.push(value);
            }
        }
    }

    /// Add a written variable to node `order` without touching the relation table.
    pub fn add_unlinked_written_variable(&mut self, order: usize, value: VarValue) {
        if let Some(node) = self.node_mut(order) {
            if !node.writes(&value.var_id) {
                node.written_variables.push(value);
            }
        }
    }

    /// Add a written variable to node `order` and register it as a producer.
    pub fn add_written_variable(&mut self, order: usize, value: VarValue) {
        self.relations.add_producer(&value.var_id, &value.variable, order);
        if let Some(node) = self.node_mut(order) {
            if !node.writes(&value.var_id) {
                node.written_variables.push(value);
            }
        }
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a TraceNode;
    type IntoIter = std::slice::Iter<'a, TraceNode>;
    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

/// Aggregate statistics of a trace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    /// Number of nodes
    pub nodes: usize,
    /// Number of distinct variable identities
    pub identities: usize,
    /// Nodes flagged with an exception
    pub exceptions: usize,
    /// Call sites with a step-over successor
    pub step_overs: usize,
    /// Deepest invocation nesting
    pub max_depth: usize,
}

// Pretty print for Trace
impl Trace {
    /// Compute summary statistics
    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            nodes: self.nodes.len(),
            identities: self.relations.len(),
            exceptions: self.nodes.iter().filter(|n| n.exception).count(),
            step_overs: self.nodes.iter().filter(|n| n.step_over_next.is_some()).count(),
            max_depth: self.nodes.iter().map(|n| self.depth_of(n.order)).max().unwrap_or(0),
        }
    }

    /// Print the invocation tree with read/written variables of every node
    pub fn print_trace_tree(&self) {
        println!();
        println!("\x1b[36m════════════════════ EXECUTION TRACE TREE ════════════════════\x1b[0m");
        println!();

        let roots: Vec<&TraceNode> =
            self.nodes.iter().filter(|node| node.invocation_parent.is_none()).collect();

        if roots.is_empty() {
            println!("  \x1b[90mNo trace nodes recorded\x1b[0m");
            return;
        }

        for (i, root) in roots.iter().enumerate() {
            self.print_trace_node(root, 0, i == roots.len() - 1, vec![]);
        }

        println!();
        self.print_summary();
    }

    fn print_trace_node(
        &self,
        node: &TraceNode,
        indent_level: usize,
        is_last: bool,
        mut prefix: Vec<bool>,
    ) {
        let mut tree_str = String::new();
        for &is_empty in &prefix {
            tree_str.push_str(if is_empty { "    " } else { "\x1b[90m│\x1b[0m   " });
        }
        if indent_level > 0 {
            tree_str.push_str(if is_last { "\x1b[90m└──\x1b[0m " } else { "\x1b[90m├──\x1b[0m " });
        }

        let exception = if node.exception { " \x1b[91m⚡ exception\x1b[0m" } else { "" };
        let step_over = node
            .step_over_next
            .map(|next| format!(" \x1b[90m⤼ #{next}\x1b[0m"))
            .unwrap_or_default();

        println!(
            "{tree_str}\x1b[93m#{}\x1b[0m \x1b[37m{}:{}\x1b[0m{exception}{step_over}",
            node.order,
            node.class_name(),
            node.line()
        );

        let padding = "    ".repeat(indent_level + 1);
        for var in &node.read_variables {
            println!("{padding}\x1b[32m◂ {} = {}\x1b[0m", var.name(), var.string_value());
        }
        for var in &node.written_variables {
            println!("{padding}\x1b[34m▸ {} = {}\x1b[0m", var.name(), var.string_value());
        }

        if indent_level > 0 {
            prefix.push(is_last);
        }
        let children = self.children_of(node.order);
        for (i, child) in children.iter().enumerate() {
            self.print_trace_node(child, indent_level + 1, i == children.len() - 1, prefix.clone());
        }
    }

    fn print_summary(&self) {
        let summary = self.summary();
        println!("\x1b[36mSummary:\x1b[0m");
        println!(
            "  Nodes: {} | Identities: {} | \x1b[91mExceptions: {}\x1b[0m | Step-overs: {} | Depth: {}",
            summary.nodes,
            summary.identities,
            summary.exceptions,
            summary.step_overs,
            summary.max_depth
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ValueSnapshot, Variable};

    fn point(line: usize) -> Arc<BreakPoint> {
        Arc::new(BreakPoint::new("com.example.Calc", line))
    }

    #[test]
    fn test_append_links_step_in_chain() {
        let mut trace = Trace::new();
        assert_eq!(trace.append_node(point(3)), 1);
        assert_eq!(trace.append_node(point(4)), 2);
        assert_eq!(trace.append_node(point(5)), 3);

        assert_eq!(trace.len(), 3);
        assert!(trace.node(0).is_none());
        assert_eq!(trace.node(1).unwrap().step_in_next, Some(2));
        assert_eq!(trace.node(2).unwrap().step_in_prev, Some(1));
        assert_eq!(trace.node(3).unwrap().step_in_next, None);
        assert_eq!(trace.latest_order(), Some(3));

        let orders: Vec<_> = trace.iter().map(|n| n.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[test]
    fn test_defining_order_generations() {
        let mut trace = Trace::new();
        assert_eq!(trace.defining_order(Access::Read, "x", 1), 0);
        assert_eq!(trace.defining_order(Access::Written, "x", 2), 2);
        assert_eq!(trace.defining_order(Access::Read, "x", 3), 2);
        assert_eq!(trace.defining_order(Access::Written, "x", 4), 4);
        assert_eq!(trace.defining_order(Access::Read, "x", 5), 4);
        assert_eq!(trace.defining_order(Access::Read, "y", 5), 0);
    }

    #[test]
    fn test_variables_register_relations() {
        let mut trace = Trace::new();
        trace.append_node(point(3));
        trace.append_node(point(4));

        let x = VarValue::new(
            Variable::local("x", "int"),
            "x:1",
            ValueSnapshot::Primitive { value: "1".into() },
        );
        trace.add_written_variable(1, x.clone());
        trace.add_read_variable(2, x.clone());
        trace.add_read_variable(2, x);

        assert_eq!(trace.node(2).unwrap().read_variables.len(), 1);

        let n = VarValue::new(
            Variable::param("n", "int"),
            "n:1",
            ValueSnapshot::Primitive { value: "3".into() },
        );
        trace.add_unlinked_written_variable(1, n);
        assert!(trace.node(1).unwrap().writes("n:1"));
        assert!(trace.relation("n:1").is_none());
        assert_eq!(trace.producers_of("x:1"), vec![1]);
        assert_eq!(trace.consumers_of("x:1"), vec![2]);
        assert!(trace.producers_of("missing").is_empty());
    }

    #[test]
    fn test_call_tree_queries() {
        let mut trace = Trace::new();
        for line in 1..=5 {
            trace.append_node(point(line));
        }
        trace.add_invocation_child(1, 2);
        trace.add_invocation_child(1, 3);
        trace.add_invocation_child(3, 4);
        trace.link_step_over(1, 5);
        trace.mark_exception(4);

        assert_eq!(trace.children_of(1).iter().map(|n| n.order).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(trace.node(4).unwrap().invocation_parent, Some(3));
        assert_eq!(trace.depth_of(4), 2);
        assert_eq!(trace.find_latest_exception_node().map(|n| n.order), Some(4));
        assert_eq!(trace.node(5).unwrap().step_over_prev, Some(1));

        let summary = trace.summary();
        assert_eq!(summary.nodes, 5);
        assert_eq!(summary.exceptions, 1);
        assert_eq!(summary.step_overs, 1);
        assert_eq!(summary.max_depth, 2);

        trace.print_trace_tree();
    }

    #[test]
    fn test_json_round_trip_keeps_nodes() {
        let mut trace = Trace::new();
        trace.append_node(point(7));
        let json = trace.to_json_value().unwrap();
        assert_eq!(json["nodes"][0]["order"], 1);
        assert_eq!(json["nodes"][0]["breakpoint"]["line"], 7);

        let back: Trace = serde_json::from_value(json).unwrap();
        assert_eq!(back.len(), 1);
    }
}
