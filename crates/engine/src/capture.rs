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

//! Two-phase step capture
//!
//! A step's read variables are captured as soon as the step is reached. Its written
//! variables can only be observed once the statement has executed, so they are
//! captured when the *next* step is reached, from that step's frame (see the
//! deferred-write handling in [`TraceEngine`](crate::TraceEngine)).
//!
//! Evaluation failures never abort a step: the variable is logged and dropped.

use std::sync::Arc;

use dashmap::DashMap;
use etrace_common::types::{
    Access, BreakPoint, NamedValue, Trace, ValueSnapshot, VarValue, Variable,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    DebugSession, EvalError, FrameId, FrameInfo, IdentityResolver, Location, MethodInfo,
    RuntimeValue, StaticResolver, ThreadId,
};

/// One lock per live stack frame, serializing evaluations against that frame.
#[derive(Debug, Default, Clone)]
pub struct FrameLocks {
    inner: Arc<DashMap<FrameId, Arc<Mutex<()>>>>,
}

impl FrameLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `frame`, created on first use
    pub fn lock_for(&self, frame: FrameId) -> Arc<Mutex<()>> {
        self.inner.entry(frame).or_default().clone()
    }

    /// Number of frames with a lock
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no frame has a lock
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every lock, at the end of a session
    pub fn clear(&self) {
        self.inner.clear();
    }
}

/// Evaluates and records variables of one step against the live target.
#[derive(Debug)]
pub struct StepCapture<'a, S, R> {
    session: &'a S,
    resolver: &'a R,
    locks: &'a FrameLocks,
    variable_layer: usize,
}

impl<'a, S: DebugSession, R: StaticResolver> StepCapture<'a, S, R> {
    /// Create a capture over `session`, expanding snapshots `variable_layer` levels deep
    pub fn new(
        session: &'a S,
        resolver: &'a R,
        locks: &'a FrameLocks,
        variable_layer: usize,
    ) -> Self {
        Self { session, resolver, locks, variable_layer }
    }

    /// The underlying debug session
    pub fn session(&self) -> &'a S {
        self.session
    }

    /// The frame of `thread` currently at `location`.
    ///
    /// Prefers an exact match; falls back to a frame on the same line of the same method.
    pub fn find_frame(&self, thread: ThreadId, location: &Location) -> Result<FrameInfo, EvalError> {
        let frames = self.session.frames(thread)?;
        let exact = frames.iter().position(|frame| &frame.location == location);
        let index = exact.or_else(|| {
            frames.iter().position(|frame| {
                frame.location.method == location.method && frame.location.line == location.line
            })
        });
        index
            .map(|idx| frames[idx].clone())
            .ok_or_else(|| EvalError::FrameNotFound(location.to_string()))
    }

    /// Capture `vars` for node `order` from the frame at `location` and record them as
    /// read or written. Returns how many variables were captured.
    pub fn capture(
        &self,
        trace: &mut Trace,
        order: usize,
        thread: ThreadId,
        location: &Location,
        vars: &[Variable],
        access: Access,
    ) -> usize {
        if vars.is_empty() {
            return 0;
        }
        let Some(point) = trace.node(order).map(|node| node.breakpoint.clone()) else {
            warn!(order, "cannot capture variables of a missing node");
            return 0;
        };
        let frame = match self.find_frame(thread, location) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(order, %location, %err, "no frame to capture {access} variables from");
                return 0;
            }
        };

        let lock = self.locks.lock_for(frame.id);
        let _guard = lock.lock();

        let mut captured = 0;
        for var in vars {
            match self.evaluate_variable(trace, order, &point, thread, frame.id, var, access) {
                Ok(value) => {
                    debug!(order, var_id = %value.var_id, value = %value.value, "captured {access} variable");
                    match access {
                        Access::Read => trace.add_read_variable(order, value),
                        Access::Written => trace.add_written_variable(order, value),
                    }
                    captured += 1;
                }
                Err(err) => debug!(order, var = var.name(), %err, "dropped {access} variable"),
            }
        }
        captured
    }

    /// Evaluate `var` in `frame` and resolve its identity as accessed by node `order`.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate_variable(
        &self,
        trace: &mut Trace,
        order: usize,
        point: &BreakPoint,
        thread: ThreadId,
        frame: FrameId,
        var: &Variable,
        access: Access,
    ) -> Result<VarValue, EvalError> {
        let expression = var.expression().ok_or_else(|| EvalError::InvalidExpression {
            expression: var.name().to_string(),
            reason: "not evaluable".to_string(),
        })?;
        let evaluation = self.session.evaluate(thread, frame, expression)?;

        let identity = IdentityResolver::new(self.session, self.resolver, thread, frame);
        let var_id = identity.resolve(trace, var, &evaluation, point, order, access)?;

        let snapshot = self.snapshot(thread, &evaluation.value, self.variable_layer);
        Ok(VarValue::new(var.clone(), var_id, snapshot))
    }

    /// Capture the parameters of `method`, just entered at `location`, as values written
    /// by call site `call_site`. Returns the captured values.
    ///
    /// The call site only becomes a producer in [`reconcile`](crate::reconcile), and only
    /// for the invocation its first child belongs to.
    pub fn capture_params(
        &self,
        trace: &mut Trace,
        call_site: usize,
        thread: ThreadId,
        location: &Location,
        method: &MethodInfo,
    ) -> Vec<VarValue> {
        let frame = match self.find_frame(thread, location) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(call_site, %location, %err, "no callee frame to capture parameters from");
                return Vec::new();
            }
        };

        let lock = self.locks.lock_for(frame.id);
        let _guard = lock.lock();

        let identity = IdentityResolver::new(self.session, self.resolver, thread, frame.id);
        let unit = location.declaring_unit();
        let mut params = Vec::with_capacity(method.params.len());
        for param in &method.params {
            let resolved = self.session.evaluate(thread, frame.id, &param.name).and_then(|eval| {
                let var_id = identity.resolve_param(
                    trace,
                    unit,
                    method.line,
                    &param.name,
                    &eval.value,
                    call_site,
                )?;
                Ok((var_id, eval.value))
            });

            match resolved {
                Ok((var_id, value)) => {
                    let snapshot = self.snapshot(thread, &value, self.variable_layer);
                    let value = VarValue::new(
                        Variable::param(&param.name, &param.type_name),
                        var_id,
                        snapshot,
                    );
                    trace.add_unlinked_written_variable(call_site, value.clone());
                    params.push(value);
                }
                Err(err) => debug!(call_site, param = %param.name, %err, "dropped parameter"),
            }
        }
        params
    }

    /// Snapshot a runtime value, expanding fields and elements `layer` levels deep.
    pub fn snapshot(&self, thread: ThreadId, value: &RuntimeValue, layer: usize) -> ValueSnapshot {
        match value {
            RuntimeValue::Primitive { value, .. } => ValueSnapshot::Primitive { value: value.clone() },
            RuntimeValue::Null => ValueSnapshot::null(),
            RuntimeValue::Void => ValueSnapshot::Primitive { value: "void".to_string() },
            RuntimeValue::Str { value, .. } => ValueSnapshot::Str { value: value.clone() },
            RuntimeValue::Object { heap_id, type_name } => {
                let mut fields = Vec::new();
                if layer > 0 {
                    match self.session.fields(thread, *heap_id) {
                        Ok(raw) => {
                            fields = raw
                                .iter()
                                .map(|(name, v)| NamedValue::new(name, self.snapshot(thread, v, layer - 1)))
                                .collect();
                            fields.sort_by(|a, b| a.name.cmp(&b.name));
                        }
                        Err(err) => debug!(heap_id, %err, "cannot expand object fields"),
                    }
                }
                ValueSnapshot::Reference { heap_id: *heap_id, type_name: type_name.clone(), fields }
            }
            RuntimeValue::Array { heap_id, component_type, .. } => {
                let mut elements = Vec::new();
                if layer > 0 {
                    match self.session.array_elements(thread, *heap_id) {
                        Ok(raw) => {
                            elements = raw
                                .iter()
                                .enumerate()
                                .map(|(i, v)| {
                                    NamedValue::new(i.to_string(), self.snapshot(thread, v, layer - 1))
                                })
                                .collect();
                        }
                        Err(err) => debug!(heap_id, %err, "cannot expand array elements"),
                    }
                }
                ValueSnapshot::Array {
                    heap_id: *heap_id,
                    component_type: component_type.clone(),
                    elements,
                }
            }
        }
    }

    /// Render a returned value the way it is stored on a virtual variable
    pub fn render_returned(&self, thread: ThreadId, value: &RuntimeValue) -> String {
        self.snapshot(thread, value, self.variable_layer).display_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_locks_are_per_frame() {
        let locks = FrameLocks::new();
        let a = locks.lock_for(FrameId(1));
        let a_again = locks.lock_for(FrameId(1));
        let b = locks.lock_for(FrameId(2));

        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(locks.len(), 2);

        let guard = a.lock();
        assert!(a_again.try_lock().is_none());
        assert!(b.try_lock().is_some());
        drop(guard);

        locks.clear();
        assert!(locks.is_empty());
    }
}
