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

//! Variable identity resolution.
//!
//! Every captured variable gets a `var_id` naming the storage cell it lives in,
//! stable across steps and distinct across cells that share a textual name:
//!
//! | Cell | Prefix |
//! |---|---|
//! | local / parameter holding a primitive | `unit$name$scopeStart$scopeEnd` |
//! | instance field | `ownerHeapId.field` |
//! | static field | `name` |
//! | array element | `arrayHeapId[index]` |
//! | any variable holding an object | `heapId` |
//! | return value of node `n` | `virtual:n` |
//!
//! All prefixes except virtual ones are suffixed with `:<defining order>`, the order of
//! the node that most recently wrote the prefix (see [`Trace::defining_order`]).

use etrace_common::types::{simple_name, Access, BreakPoint, Trace, Variable, VIRTUAL_PREFIX};

use crate::{
    DebugSession, EvalError, Evaluation, FrameId, LocalScope, RuntimeValue, StaticResolver,
    ThreadId,
};

/// Identity prefix of a local variable or parameter
pub fn local_var_id(unit: &str, name: &str, scope: LocalScope) -> String {
    format!("{unit}${name}${}${}", scope.start_line, scope.end_line)
}

/// Identity prefix of an instance field
pub fn field_var_id(owner_heap_id: u64, field: &str) -> String {
    format!("{owner_heap_id}.{field}")
}

/// Identity prefix of an array element
pub fn array_element_var_id(array_heap_id: u64, index: &str) -> String {
    format!("{array_heap_id}[{index}]")
}

/// Identity of the value returned at node `order`
pub fn virtual_var_id(order: usize) -> String {
    format!("{VIRTUAL_PREFIX}{order}")
}

/// Append the defining-order suffix to an identity prefix
pub fn with_defining_order(prefix: &str, order: usize) -> String {
    format!("{prefix}:{order}")
}

/// Display name of the virtual variable for a return statement at `point`: the
/// innermost method containing the line, or the unit's simple name.
pub fn virtual_var_name<R: StaticResolver>(resolver: &R, point: &BreakPoint) -> String {
    let method = resolver
        .enclosing_method(&point.declaring_unit, point.line)
        .map(|m| m.name)
        .unwrap_or_else(|| simple_name(&point.declaring_unit).to_string());
    format!("{VIRTUAL_PREFIX}{method}")
}

/// Resolves identities of variables evaluated in one stack frame.
#[derive(Debug)]
pub struct IdentityResolver<'a, S, R> {
    session: &'a S,
    resolver: &'a R,
    thread: ThreadId,
    frame: FrameId,
}

impl<'a, S: DebugSession, R: StaticResolver> IdentityResolver<'a, S, R> {
    /// Resolver for `frame` of `thread`
    pub fn new(session: &'a S, resolver: &'a R, thread: ThreadId, frame: FrameId) -> Self {
        Self { session, resolver, thread, frame }
    }

    /// Full identity of `var`, evaluated as `evaluation`, when accessed by node `order`
    /// located at `point`.
    pub fn resolve(
        &self,
        trace: &mut Trace,
        var: &Variable,
        evaluation: &Evaluation,
        point: &BreakPoint,
        order: usize,
        access: Access,
    ) -> Result<String, EvalError> {
        if let Some(heap_id) = evaluation.value.heap_id() {
            let prefix = heap_id.to_string();
            return Ok(with_defining_order(&prefix, trace.defining_order(access, &prefix, order)));
        }

        let prefix = match var {
            Variable::Local { name, .. } | Variable::Param { name, .. } => {
                match self.resolver.local_scope(&point.declaring_unit, name, point.line) {
                    Some(scope) => local_var_id(&point.declaring_unit, name, scope),
                    // An implicit `this`: the receiver itself, already unique.
                    None if name == "this" => return self.this_heap_id().map(|id| id.to_string()),
                    None => return Err(EvalError::NotAvailable(name.clone())),
                }
            }
            Variable::Field { is_static: true, name, .. } => name.clone(),
            Variable::Field { .. } => field_var_id(self.owner_heap_id(evaluation)?, var.simple_name()),
            Variable::ArrayElement { index, .. } => {
                let owner = self.owner_heap_id(evaluation)?;
                array_element_var_id(owner, &self.index_value(index)?)
            }
            Variable::Virtual { name, .. } => {
                return Err(EvalError::InvalidExpression {
                    expression: name.clone(),
                    reason: "virtual variables are synthesized, not evaluated".to_string(),
                });
            }
        };

        Ok(with_defining_order(&prefix, trace.defining_order(access, &prefix, order)))
    }

    /// Identity of a parameter of a method starting at `method_line` of `unit`, written by
    /// call site `order`. Parameters are scoped to the whole method body.
    pub fn resolve_param(
        &self,
        trace: &mut Trace,
        unit: &str,
        method_line: usize,
        name: &str,
        value: &RuntimeValue,
        order: usize,
    ) -> Result<String, EvalError> {
        let prefix = match value.heap_id() {
            Some(heap_id) => heap_id.to_string(),
            None => {
                let method = self
                    .resolver
                    .enclosing_method(unit, method_line)
                    .ok_or_else(|| EvalError::AbsentInformation(format!("{unit}:{method_line}")))?;
                local_var_id(unit, name, LocalScope::from(&method))
            }
        };
        Ok(with_defining_order(&prefix, trace.defining_order(Access::Written, &prefix, order)))
    }

    fn this_heap_id(&self) -> Result<u64, EvalError> {
        self.session
            .this_object(self.thread, self.frame)?
            .and_then(|this| this.heap_id())
            .ok_or_else(|| EvalError::NotAvailable("this".to_string()))
    }

    /// Heap identity of the object a member was read from, defaulting to `this`.
    fn owner_heap_id(&self, evaluation: &Evaluation) -> Result<u64, EvalError> {
        match evaluation.parent.as_ref().and_then(RuntimeValue::heap_id) {
            Some(heap_id) => Ok(heap_id),
            None => self.this_heap_id(),
        }
    }

    fn index_value(&self, index: &str) -> Result<String, EvalError> {
        match self.session.evaluate(self.thread, self.frame, index)?.value {
            RuntimeValue::Primitive { value, .. } => Ok(value),
            other => Err(EvalError::InvalidExpression {
                expression: index.to_string(),
                reason: format!("array index evaluated to {}", other.simple_type_name()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndexedResolver;

    #[test]
    fn test_identity_formats() {
        assert_eq!(local_var_id("Calc", "x", LocalScope::new(3, 9)), "Calc$x$3$9");
        assert_eq!(field_var_id(17, "count"), "17.count");
        assert_eq!(array_element_var_id(21, "3"), "21[3]");
        assert_eq!(virtual_var_id(8), "virtual:8");
        assert_eq!(with_defining_order("Calc$x$3$9", 2), "Calc$x$3$9:2");
    }

    #[test]
    fn test_virtual_var_name() {
        let resolver = IndexedResolver::new().with_method("com.example.Calc", "square", 10, 14);
        let inside = BreakPoint::new("com.example.Calc", 12).with_return();
        let outside = BreakPoint::new("com.example.Calc", 30).with_return();
        assert_eq!(virtual_var_name(&resolver, &inside), "virtual:square");
        assert_eq!(virtual_var_name(&resolver, &outside), "virtual:Calc");
    }
}
