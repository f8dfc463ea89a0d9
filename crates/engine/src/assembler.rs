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

//! Trace assembly.
//!
//! Helpers the engine uses while nodes are appended, and [`reconcile`], the secondary
//! pass run once the event stream has ended. The pass only adds relations that need
//! the finished trace: read propagation across step-overs, parameter passing into a
//! callee's first node, and values returned by nodes that are not return statements.

use etrace_common::{
    etrace_assert_eq,
    types::{Trace, ValueSnapshot, VarValue, Variable},
};
use tracing::{debug, info};

use crate::{virtual_var_id, CallStack};

/// Maximum line distance between a call site and its step-over successor for the
/// successor to inherit the call site's reads.
pub const STEP_OVER_LINE_WINDOW: usize = 2;

/// Attach node `order` to the call site of the innermost open invocation, if any.
pub fn attach_to_invocation_parent(trace: &mut Trace, stack: &CallStack, order: usize) {
    if let Some(frame) = stack.top() {
        trace.add_invocation_child(frame.call_site, order);
    }
}

/// A value returned by a method, rendered for a virtual variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnedValue {
    /// Type shown on the virtual variable
    pub type_name: String,
    /// Rendered value
    pub rendered: String,
}

/// Record the value returned at `return_node` as a virtual variable written there
/// and read by `consumer`.
pub fn link_return_value(
    trace: &mut Trace,
    return_node: usize,
    consumer: usize,
    name: String,
    returned: ReturnedValue,
) {
    let value = VarValue::new(
        Variable::virtual_var(name, returned.type_name),
        virtual_var_id(return_node),
        ValueSnapshot::Virtual { value: returned.rendered },
    );
    debug!(return_node, consumer, var_id = %value.var_id, "linked returned value");
    trace.add_written_variable(return_node, value.clone());
    trace.add_read_variable(consumer, value);
}

/// Secondary pass over the finished trace.
pub fn reconcile(trace: &mut Trace) {
    for order in 1..=trace.len() {
        propagate_step_over_reads(trace, order);
        link_pass_parameters(trace, order);
        link_returned_variables(trace, order);
    }
    check_step_in_chain(trace);

    let summary = trace.summary();
    info!(
        nodes = summary.nodes,
        identities = summary.identities,
        exceptions = summary.exceptions,
        "trace reconciled"
    );
}

/// A step-over successor close to its call site re-reads what the call site read:
/// the call's arguments are usually evaluated on the same statement.
fn propagate_step_over_reads(trace: &mut Trace, order: usize) {
    let Some(node) = trace.node(order) else { return };
    let Some(call_site) = node.step_over_prev.and_then(|prev| trace.node(prev)) else { return };
    if call_site.class_name() != node.class_name()
        || call_site.line().abs_diff(node.line()) > STEP_OVER_LINE_WINDOW
    {
        return;
    }

    let inherited: Vec<VarValue> = call_site
        .read_variables
        .iter()
        .filter(|var| !node.reads(&var.var_id))
        .cloned()
        .collect();
    for var in inherited {
        trace.add_read_variable(order, var);
    }
}

/// Parameters reaching a callee's first node were produced by the call site.
fn link_pass_parameters(trace: &mut Trace, order: usize) {
    let Some(node) = trace.node(order) else { return };
    if node.pass_parameters.is_empty() {
        return;
    }
    let Some(parent) = node.invocation_parent else { return };
    let is_first_child =
        trace.node(parent).is_some_and(|p| p.invocation_children.first() == Some(&order));
    if !is_first_child {
        return;
    }

    let params = node.pass_parameters.clone();
    let relations = trace.relations_mut();
    for param in &params {
        relations.add_producer(&param.var_id, &param.variable, parent);
    }
}

/// A value returned by a node that is not a return statement flows to the step after
/// the call, or failing that to the next step.
fn link_returned_variables(trace: &mut Trace, order: usize) {
    let Some(node) = trace.node(order) else { return };
    if node.returned_variables.is_empty() {
        return;
    }
    let Some(parent) = node.invocation_parent.and_then(|p| trace.node(p)) else { return };
    let Some(target) = parent.step_over_next.or(node.step_in_next) else { return };

    for value in node.returned_variables.clone() {
        trace.add_written_variable(order, value.clone());
        trace.add_read_variable(target, value);
    }
}

fn check_step_in_chain(trace: &Trace) {
    for (idx, node) in trace.iter().enumerate() {
        etrace_assert_eq!(node.order, idx + 1, "trace order must be gapless");
        etrace_assert_eq!(
            node.step_in_next,
            (idx + 1 < trace.len()).then_some(idx + 2),
            "step-in chain must follow order"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use etrace_common::types::BreakPoint;

    use super::*;

    fn trace_of(lines: &[usize]) -> Trace {
        let mut trace = Trace::new();
        for &line in lines {
            trace.append_node(Arc::new(BreakPoint::new("Calc", line)));
        }
        trace
    }

    fn int(name: &str, id: &str, value: i64) -> VarValue {
        VarValue::new(
            Variable::local(name, "int"),
            id,
            ValueSnapshot::Primitive { value: value.to_string() },
        )
    }

    #[test]
    fn test_step_over_successor_inherits_reads() {
        // 1: y = f(x) calls into 2, then 3 is the step-over successor on the next line.
        let mut trace = trace_of(&[10, 20, 11]);
        trace.add_invocation_child(1, 2);
        trace.link_step_over(1, 3);
        trace.add_read_variable(1, int("x", "Calc$x$1$30:0", 4));

        reconcile(&mut trace);

        assert!(trace.node(3).unwrap().reads("Calc$x$1$30:0"));
        assert_eq!(trace.consumers_of("Calc$x$1$30:0"), vec![1, 3]);
    }

    #[test]
    fn test_distant_step_over_does_not_inherit() {
        let mut trace = trace_of(&[10, 20, 14]);
        trace.add_invocation_child(1, 2);
        trace.link_step_over(1, 3);
        trace.add_read_variable(1, int("x", "x:0", 4));

        reconcile(&mut trace);
        assert!(!trace.node(3).unwrap().reads("x:0"));
    }

    #[test]
    fn test_pass_parameters_produced_by_call_site() {
        let mut trace = trace_of(&[10, 20, 21]);
        trace.add_invocation_child(1, 2);
        trace.add_invocation_child(1, 3);
        trace.node_mut(2).unwrap().pass_parameters.push(int("n", "Calc$n$19$25:1", 3));
        trace.node_mut(3).unwrap().pass_parameters.push(int("m", "Calc$m$19$25:1", 3));

        reconcile(&mut trace);

        assert_eq!(trace.producers_of("Calc$n$19$25:1"), vec![1]);
        // Only the first child receives parameters.
        assert!(trace.producers_of("Calc$m$19$25:1").is_empty());
    }

    #[test]
    fn test_returned_variable_flows_to_step_over_successor() {
        let mut trace = trace_of(&[10, 20, 11]);
        trace.add_invocation_child(1, 2);
        trace.link_step_over(1, 3);
        let returned = VarValue::new(
            Variable::virtual_var("virtual:b", "int"),
            virtual_var_id(2),
            ValueSnapshot::Virtual { value: "5".into() },
        );
        trace.node_mut(2).unwrap().returned_variables.push(returned);

        reconcile(&mut trace);

        assert!(trace.node(2).unwrap().writes("virtual:2"));
        assert!(trace.node(3).unwrap().reads("virtual:2"));
        assert_eq!(trace.producers_of("virtual:2"), vec![2]);
        assert_eq!(trace.consumers_of("virtual:2"), vec![3]);
    }

    #[test]
    fn test_link_return_value() {
        let mut trace = trace_of(&[20, 11]);
        link_return_value(
            &mut trace,
            1,
            2,
            "virtual:b".into(),
            ReturnedValue { type_name: "int".into(), rendered: "5".into() },
        );

        let written = &trace.node(1).unwrap().written_variables[0];
        assert_eq!(written.var_id, "virtual:1");
        assert_eq!(written.name(), "virtual:b");
        assert_eq!(written.string_value(), "5");
        assert!(trace.node(2).unwrap().reads("virtual:1"));
    }

    #[test]
    fn test_attach_to_invocation_parent() {
        let mut trace = trace_of(&[10, 20]);
        let mut stack = CallStack::new();
        attach_to_invocation_parent(&mut trace, &stack, 1);
        assert!(trace.node(1).unwrap().invocation_parent.is_none());

        stack.push(1, etrace_common::types::MethodSignature::new("Calc", "b", "()I"));
        attach_to_invocation_parent(&mut trace, &stack, 2);
        assert_eq!(trace.node(2).unwrap().invocation_parent, Some(1));
        assert_eq!(trace.node(1).unwrap().invocation_children, vec![2]);
    }
}
