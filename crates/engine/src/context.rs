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

//! Per-session engine state.
//!
//! Everything the engine carries between events of one run lives in a single
//! [`SessionContext`] owned by the [`TraceEngine`](crate::TraceEngine). Nothing here
//! survives the session.

use std::{
    collections::HashMap,
    sync::Arc,
};

use etrace_common::types::{BreakPoint, MethodSignature, VarValue};
use tracing::{debug, warn};

use crate::{
    CallStack, DebugSession, EngineConfig, FrameLocks, LibraryCapture, Location, RuntimeValue,
    ThreadId,
};

/// An execution-order entry plus whether the entry of its method has been observed.
#[derive(Debug, Clone)]
pub struct PointWrapper {
    /// The breakpoint
    pub point: Arc<BreakPoint>,
    /// Set once a method entry or exit event matched this point
    pub hit: bool,
}

impl PointWrapper {
    /// Wrap a breakpoint, not yet hit
    pub fn new(point: Arc<BreakPoint>) -> Self {
        Self { point, hit: false }
    }

    /// Whether `location` is on this point's line
    pub fn is_at(&self, location: &Location) -> bool {
        location.line_number().is_some_and(|line| self.point.is_at(&location.class_name, line))
    }
}

/// A recorded node whose written variables are captured at the next step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStep {
    /// Order of the node
    pub order: usize,
    /// Method the node executed in
    pub signature: MethodSignature,
}

/// Parameters captured on entry, waiting for the callee's first node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassedParams {
    /// Call site that passed them
    pub call_site: usize,
    /// Captured values
    pub values: Vec<VarValue>,
}

/// Mutable state of one trace run
#[derive(Debug)]
pub struct SessionContext {
    /// Open invocations
    pub call_stack: CallStack,
    /// Node awaiting its written-variable capture
    pub pending: Option<PendingStep>,
    /// Call site whose invocation just returned; the next node is its step-over successor
    pub just_popped: Option<usize>,
    /// Value of the latest method return, consumed by the next virtual variable
    pub latest_returned: Option<RuntimeValue>,
    /// Parameters passed by the latest recorded call site, for the callee's first node
    pub pending_pass_params: Option<PassedParams>,
    /// Catch location of an exception in flight
    pub caught_location: Option<Location>,
    /// Expected execution order with hit flags, indexed by `order - 1`
    pub execution_order: Vec<PointWrapper>,
    /// Breakpoints bound to loaded classes, keyed by class and line
    pub bound_points: HashMap<(String, usize), Arc<BreakPoint>>,
    /// Whether method entry and exit events are requested
    pub method_watches_enabled: bool,
    /// Re-enable method watches after the current batch
    pub recover_method_watches: bool,
    /// False while waiting for the recording trigger
    pub recording: bool,
    /// The thread the target started on; events of other threads are ignored
    pub traced_thread: Option<ThreadId>,
    /// Evaluation locks
    pub frame_locks: FrameLocks,
    /// Library-step capture
    pub library: LibraryCapture,
}

impl SessionContext {
    /// Fresh state for a run over `execution_order`
    pub fn new(execution_order: Vec<Arc<BreakPoint>>, config: &EngineConfig) -> Self {
        Self {
            call_stack: CallStack::new(),
            pending: None,
            just_popped: None,
            latest_returned: None,
            pending_pass_params: None,
            caught_location: None,
            execution_order: execution_order.into_iter().map(PointWrapper::new).collect(),
            bound_points: HashMap::new(),
            method_watches_enabled: true,
            recover_method_watches: false,
            recording: config.recording_trigger.is_none(),
            traced_thread: None,
            frame_locks: FrameLocks::new(),
            library: LibraryCapture::new(config.location_cache_capacity),
        }
    }

    /// Whether events of `thread` belong to the trace. Without a VM start, the first
    /// thread seen is adopted.
    pub fn is_traced(&mut self, thread: ThreadId) -> bool {
        *self.traced_thread.get_or_insert(thread) == thread
    }

    /// Execution-order entry of node `order` (1-based)
    pub fn point_mut(&mut self, order: usize) -> Option<&mut PointWrapper> {
        order.checked_sub(1).and_then(|idx| self.execution_order.get_mut(idx))
    }

    /// Breakpoint bound at `class_name:line`, if the location is interesting
    pub fn interesting(&self, class_name: &str, line: usize) -> Option<Arc<BreakPoint>> {
        self.bound_points.get(&(class_name.to_string(), line)).cloned()
    }

    /// Bind every breakpoint of the just-prepared `class_name`. Returns how many bound.
    pub fn bind_class<S: DebugSession>(&mut self, class_name: &str, session: &S) -> usize {
        let mut bound = 0;
        for wrapper in &self.execution_order {
            let point = &wrapper.point;
            if point.class_name != class_name {
                continue;
            }
            let key = (point.class_name.clone(), point.line);
            if self.bound_points.contains_key(&key) {
                continue;
            }
            match session.line_location(class_name, point.line) {
                Some(location) => {
                    debug!(%location, "bound breakpoint");
                    self.bound_points.insert(key, point.clone());
                    bound += 1;
                }
                None => warn!(class = class_name, line = point.line, "no code at breakpoint line"),
            }
        }
        bound
    }

    /// Release per-session resources
    pub fn teardown(&mut self) {
        self.frame_locks.clear();
        self.library.clear();
        self.pending = None;
        self.pending_pass_params = None;
        self.caught_location = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_lookup_is_one_based() {
        let points = vec![
            Arc::new(BreakPoint::new("Calc", 3)),
            Arc::new(BreakPoint::new("Calc", 4)),
        ];
        let mut ctx = SessionContext::new(points, &EngineConfig::default());
        assert!(ctx.point_mut(0).is_none());
        assert_eq!(ctx.point_mut(2).map(|p| p.point.line), Some(4));
        assert!(ctx.point_mut(3).is_none());
        assert!(ctx.recording);
    }

    #[test]
    fn test_only_one_thread_is_traced() {
        let mut ctx = SessionContext::new(Vec::new(), &EngineConfig::default());
        assert!(ctx.is_traced(ThreadId(4)));
        assert!(ctx.is_traced(ThreadId(4)));
        assert!(!ctx.is_traced(ThreadId(5)));

        ctx.traced_thread = Some(ThreadId(1));
        assert!(ctx.is_traced(ThreadId(1)));
        assert!(!ctx.is_traced(ThreadId(4)));
    }

    #[test]
    fn test_point_wrapper_matches_location_line() {
        let wrapper = PointWrapper::new(Arc::new(BreakPoint::new("Calc", 3)));
        let sig = MethodSignature::new("Calc", "main", "()V");
        assert!(wrapper.is_at(&Location::new(sig.clone(), 3, 0)));
        assert!(!wrapper.is_at(&Location::new(sig.clone(), 4, 0)));
        assert!(!wrapper.is_at(&Location::new(sig, -1, 0)));
    }
}
