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

//! Core trace-construction loop.
//!
//! [`TraceEngine`] drives one run: it pulls event batches from a [`DebugSession`],
//! sorts each batch, dispatches every event, and resumes the target. Recorded nodes
//! are linked into the step-in chain, the invocation tree and the step-over pairs as
//! they are appended; [`reconcile`](crate::reconcile) finishes the trace once the
//! event stream ends.
//!
//! # Event handling
//!
//! - **Step**: an interesting line appends a node, captures its reads, and completes
//!   the previous node's deferred written capture.
//! - **Method entry / exit**: maintain the [`CallStack`](crate::CallStack) against the
//!   expected execution order; method watches are switched off while nothing
//!   interesting can be entered.
//! - **Exception**: flags the throwing node and unwinds the call stack at the next
//!   recorded node.
//! - **VM death / disconnect**: ends the run.
//!
//! Only the thread the target starts on is traced; step, method and exception events
//! from any other thread are dropped.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use derive_more::Display;
use etrace_common::types::{
    Access, BreakPoint, Trace, ValueSnapshot, VarValue, Variable, VIRTUAL_TYPE,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{
    assembler::{self, ReturnedValue},
    populate_breakpoint, sort_events, virtual_var_id, virtual_var_name, DebugEvent,
    DebugSession, EngineConfig, EngineError, EventBatch, Location, MethodInfo, PassedParams,
    PendingStep, PopOutcome, RuntimeValue, SessionContext, StaticResolver, StepCapture, ThreadId,
};

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum StopReason {
    /// The target terminated or disconnected
    #[display("target terminated")]
    VmDeath,
    /// Cancelled through a [`CancelHandle`]
    #[display("cancelled")]
    Cancelled,
    /// The configured step limit was reached
    #[display("step limit reached")]
    StepLimit,
    /// An exception with no catch location was thrown
    #[display("uncaught exception")]
    UncaughtException,
    /// The event source was exhausted
    #[display("event source closed")]
    SessionClosed,
}

/// Result of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceOutcome {
    /// The assembled trace
    pub trace: Trace,
    /// Why the run ended
    pub stop_reason: StopReason,
}

/// Cooperative cancellation of a running [`TraceEngine`].
///
/// Checked after every recorded node and between event batches.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Request the run to stop
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Trace-construction engine for one debug session
#[derive(Debug)]
pub struct TraceEngine<S, R> {
    config: EngineConfig,
    session: S,
    resolver: R,
    trace: Trace,
    ctx: SessionContext,
    cancel: CancelHandle,
}

impl<S: DebugSession, R: StaticResolver> TraceEngine<S, R> {
    /// Create an engine recording `execution_order`, the breakpoints the target is
    /// expected to hit, in order. Breakpoints declaring no variables are filled in
    /// from `resolver`.
    pub fn new(
        config: EngineConfig,
        session: S,
        resolver: R,
        execution_order: impl IntoIterator<Item = BreakPoint>,
    ) -> Self {
        let points: Vec<Arc<BreakPoint>> = execution_order
            .into_iter()
            .map(|point| populate_breakpoint(point, &resolver))
            .collect();
        let ctx = SessionContext::new(points, &config);
        Self { config, session, resolver, trace: Trace::new(), ctx, cancel: CancelHandle::default() }
    }

    /// Handle to cancel the run from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// The engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Consume events until the run ends, then assemble the trace.
    pub async fn run(self) -> Result<TraceOutcome, EngineError> {
        let span = info_span!("trace_run", points = self.ctx.execution_order.len());
        self.run_loop().instrument(span).await
    }

    async fn run_loop(mut self) -> Result<TraceOutcome, EngineError> {
        let started = Instant::now();
        info!(step_limit = self.config.step_limit, timeout = ?self.config.event_timeout, "trace run started");

        self.session.watch_exceptions();
        self.session.set_method_watches(true);

        let stop_reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let waited = self.config.event_timeout;
            let next = tokio::time::timeout(waited, self.session.next_batch()).await;
            let batch = match next {
                Err(_) => {
                    warn!(?waited, nodes = self.trace.len(), "timed out waiting for debug events");
                    self.session.terminate();
                    return Err(EngineError::Timeout { waited });
                }
                Ok(Err(err)) => return Err(EngineError::Session(err)),
                Ok(Ok(None)) => break StopReason::SessionClosed,
                Ok(Ok(Some(batch))) => batch,
            };

            if let Some(reason) = self.process_batch(batch) {
                break reason;
            }

            if self.ctx.recover_method_watches {
                self.ctx.recover_method_watches = false;
                self.set_method_watches(true);
            }
            self.session.resume()?;
        };

        if !matches!(stop_reason, StopReason::VmDeath | StopReason::SessionClosed) {
            self.session.terminate();
        }
        self.ctx.teardown();

        let mut trace = self.trace;
        assembler::reconcile(&mut trace);
        info!(
            nodes = trace.len(),
            %stop_reason,
            elapsed = ?started.elapsed(),
            "trace run finished"
        );
        Ok(TraceOutcome { trace, stop_reason })
    }

    fn process_batch(&mut self, batch: EventBatch) -> Option<StopReason> {
        trace!(events = batch.len(), "processing event batch");
        sort_events(batch).into_iter().find_map(|event| self.handle_event(event))
    }

    fn handle_event(&mut self, event: DebugEvent) -> Option<StopReason> {
        match event {
            DebugEvent::VmStart { thread } => {
                self.on_vm_start(thread);
                None
            }
            DebugEvent::ThreadStart { thread } => {
                debug!(%thread, "thread started, not traced");
                None
            }
            DebugEvent::ClassPrepare { class_name } => {
                self.ctx.bind_class(&class_name, &self.session);
                None
            }
            DebugEvent::Step { thread, location } => {
                if !self.ctx.is_traced(thread) {
                    return None;
                }
                self.on_step(thread, &location)
            }
            DebugEvent::MethodEntry { thread, location, method } => {
                if self.ctx.is_traced(thread) {
                    self.on_method_entry(thread, &location, &method);
                }
                None
            }
            DebugEvent::MethodExit { thread, location, method, return_value } => {
                if self.ctx.is_traced(thread) {
                    self.on_method_exit(thread, &location, &method, return_value);
                }
                None
            }
            DebugEvent::Exception { thread, location, catch_location } => {
                if !self.ctx.is_traced(thread) {
                    return None;
                }
                self.on_exception(&location, catch_location)
            }
            DebugEvent::VmDeath | DebugEvent::VmDisconnect => Some(StopReason::VmDeath),
        }
    }

    /// Only the thread the target starts on is stepped.
    fn on_vm_start(&mut self, thread: ThreadId) {
        self.ctx.traced_thread = Some(thread);
        self.session.set_step_watch(thread, self.ctx.recording);
    }

    fn start_recording(&mut self) {
        info!("recording trigger entered");
        self.ctx.recording = true;
        if let Some(thread) = self.ctx.traced_thread {
            self.session.set_step_watch(thread, true);
        }
    }

    fn set_method_watches(&mut self, enabled: bool) {
        if self.ctx.method_watches_enabled != enabled {
            trace!(enabled, "toggling method watches");
        }
        self.session.set_method_watches(enabled);
        self.ctx.method_watches_enabled = enabled;
    }

    fn on_step(&mut self, thread: ThreadId, location: &Location) -> Option<StopReason> {
        if !self.ctx.recording {
            return None;
        }

        if self.config.is_included_library(&location.class_name) && !self.trace.is_empty() {
            let capture = StepCapture::new(
                &self.session,
                &self.resolver,
                &self.ctx.frame_locks,
                self.config.variable_layer,
            );
            if let Some(value) =
                self.ctx.library.capture(&capture, &self.resolver, &mut self.trace, thread, location)
            {
                self.ctx.latest_returned = Some(value);
            }
        }

        let line = location.line_number()?;
        if !self.ctx.method_watches_enabled {
            self.set_method_watches(true);
        }

        let capture = StepCapture::new(
            &self.session,
            &self.resolver,
            &self.ctx.frame_locks,
            self.config.variable_layer,
        );

        // Written variables of the previous node are only observable now.
        if let Some(pending) = self.ctx.pending.take() {
            if pending.signature == location.method {
                if let Some(point) = self.trace.node(pending.order).map(|n| n.breakpoint.clone()) {
                    capture.capture(
                        &mut self.trace,
                        pending.order,
                        thread,
                        location,
                        &point.written_variables,
                        Access::Written,
                    );
                }
            } else {
                trace!(order = pending.order, %location, "left the method before the write was observed");
            }
        }

        let point = self.ctx.interesting(&location.class_name, line)?;
        let order = self.trace.append_node(point.clone());
        debug!(order, %location, "recorded trace node");

        if let Some(catch) = self.ctx.caught_location.take() {
            self.unwind_to_catch(&catch);
        }
        assembler::attach_to_invocation_parent(&mut self.trace, &self.ctx.call_stack, order);
        if let Some(call_site) = self.ctx.just_popped.take() {
            self.trace.link_step_over(call_site, order);
        }
        if let Some(params) = self.ctx.pending_pass_params.take() {
            if let Some(node) = self.trace.node_mut(order) {
                if node.invocation_parent == Some(params.call_site) {
                    node.pass_parameters = params.values;
                }
            }
        }

        let capture = StepCapture::new(
            &self.session,
            &self.resolver,
            &self.ctx.frame_locks,
            self.config.variable_layer,
        );
        capture.capture(&mut self.trace, order, thread, location, &point.read_variables, Access::Read);

        let previous_return = order
            .checked_sub(1)
            .and_then(|prev| self.trace.node(prev))
            .filter(|node| node.breakpoint.is_return)
            .map(|node| (node.order, node.breakpoint.clone()));
        if let Some((return_node, return_point)) = previous_return {
            let latest_returned = self.ctx.latest_returned.take();
            let returned = match latest_returned {
                None => Some(ReturnedValue {
                    type_name: VIRTUAL_TYPE.to_string(),
                    rendered: "null".to_string(),
                }),
                Some(value) => returned_value(&capture, thread, &value),
            };
            if let Some(returned) = returned {
                let name = virtual_var_name(&self.resolver, &return_point);
                assembler::link_return_value(&mut self.trace, return_node, order, name, returned);
            }
        }

        self.ctx.pending = Some(PendingStep { order, signature: location.method.clone() });

        if self.cancel.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        if self.trace.len() >= self.config.step_limit {
            info!(limit = self.config.step_limit, "step limit reached");
            return Some(StopReason::StepLimit);
        }
        None
    }

    fn on_method_entry(&mut self, thread: ThreadId, location: &Location, method: &MethodInfo) {
        if self.config.is_included_library(method.class_name()) {
            return;
        }
        if !self.ctx.recording {
            let fired = self
                .config
                .recording_trigger
                .as_ref()
                .is_some_and(|trigger| trigger.matches(method.class_name(), method.name()));
            if !fired {
                return;
            }
            self.start_recording();
        }

        let next_index = self.trace.len();
        let latest = self.trace.latest_order();
        let Some(next) = self.ctx.execution_order.get(next_index) else {
            return;
        };
        let (at_next, next_hit, next_point) = (next.is_at(location), next.hit, next.point.clone());

        if at_next {
            self.ctx.execution_order[next_index].hit = true;
            let Some(call_site) = latest else {
                return;
            };
            if !method.params.is_empty() {
                let capture = StepCapture::new(
                    &self.session,
                    &self.resolver,
                    &self.ctx.frame_locks,
                    self.config.variable_layer,
                );
                let params =
                    capture.capture_params(&mut self.trace, call_site, thread, location, method);
                if !params.is_empty() {
                    self.ctx.pending_pass_params = Some(PassedParams { call_site, values: params });
                }
            }
            self.ctx.call_stack.push(call_site, method.signature.clone());
            return;
        }

        let is_clinit = method.signature.is_static_initializer();
        let same_method = latest.is_some_and(|order| self.in_same_method(order, &next_point));
        if next_hit || is_clinit || same_method {
            // Nothing interesting can be entered before the next step.
            self.set_method_watches(false);
            if is_clinit {
                self.ctx.recover_method_watches = true;
            }
        }
    }

    fn on_method_exit(
        &mut self,
        thread: ThreadId,
        location: &Location,
        method: &MethodInfo,
        return_value: RuntimeValue,
    ) {
        if self.config.is_included_library(method.class_name()) {
            return;
        }
        let Some(latest) = self.trace.latest_order() else {
            return;
        };
        let Some(last) = self.ctx.point_mut(latest) else {
            return;
        };

        if last.is_at(location) {
            last.hit = true;
            if let PopOutcome::Popped { call_site, .. } =
                self.ctx.call_stack.pop_matching(&method.signature)
            {
                self.ctx.just_popped = Some(call_site);
                self.record_returned_variable(thread, latest, call_site, method, &return_value);
                self.ctx.latest_returned = Some(return_value);
            }
        } else if last.hit {
            self.set_method_watches(false);
        }
    }

    /// A method can return from a line that is not a return statement (an
    /// expression-bodied lambda, say). The value is kept on the node and linked to its
    /// consumer once the trace is complete.
    fn record_returned_variable(
        &mut self,
        thread: ThreadId,
        latest: usize,
        call_site: usize,
        method: &MethodInfo,
        value: &RuntimeValue,
    ) {
        if method.return_type == "void" {
            return;
        }
        let Some(node) = self.trace.node(latest) else {
            return;
        };
        if node.breakpoint.is_return || node.invocation_parent != Some(call_site) {
            return;
        }
        let point = node.breakpoint.clone();

        let capture = StepCapture::new(
            &self.session,
            &self.resolver,
            &self.ctx.frame_locks,
            self.config.variable_layer,
        );
        let Some(returned) = returned_value(&capture, thread, value) else {
            return;
        };
        let returned = VarValue::new(
            Variable::virtual_var(virtual_var_name(&self.resolver, &point), returned.type_name),
            virtual_var_id(latest),
            ValueSnapshot::Virtual { value: returned.rendered },
        );
        if let Some(node) = self.trace.node_mut(latest) {
            node.returned_variables.push(returned);
        }
    }

    fn on_exception(
        &mut self,
        location: &Location,
        catch_location: Option<Location>,
    ) -> Option<StopReason> {
        let Some(latest) = self.trace.latest_order() else {
            debug!(%location, "exception before the first node, ignored");
            return None;
        };
        self.trace.mark_exception(latest);
        match catch_location {
            None => {
                warn!(%location, "uncaught exception");
                Some(StopReason::UncaughtException)
            }
            Some(catch) => {
                debug!(%location, %catch, "exception will be caught");
                self.ctx.caught_location = Some(catch);
                None
            }
        }
    }

    /// Pop invocations until the node being asked about is in the method that catches.
    fn unwind_to_catch(&mut self, catch: &Location) {
        if self.ctx.call_stack.is_empty() {
            return;
        }
        let Some(start) = self.trace.find_latest_exception_node().map(|node| node.order) else {
            return;
        };
        let Some(catch_line) = catch.line_number() else {
            return;
        };
        let catch_unit = catch.declaring_unit();

        let trace = &self.trace;
        let resolver = &self.resolver;
        let popped = self.ctx.call_stack.unwind_until(start, |order| {
            trace.node(order).is_some_and(|node| {
                node.declaring_unit() == catch_unit
                    && resolver.method_contains(node.declaring_unit(), node.line(), catch_line)
            })
        });
        if let Some(call_site) = popped {
            debug!(call_site, %catch, "unwound to catching method");
            self.ctx.just_popped = Some(call_site);
        }
    }

    fn in_same_method(&self, order: usize, point: &BreakPoint) -> bool {
        self.trace.node(order).is_some_and(|node| {
            let current = &node.breakpoint;
            current.class_name == point.class_name
                && match (&current.method_sign, &point.method_sign) {
                    (Some(a), Some(b)) => a == b,
                    (None, None) => true,
                    _ => false,
                }
        })
    }
}

/// Type and rendering of a returned value. `void` returns nothing.
fn returned_value<S: DebugSession, R: StaticResolver>(
    capture: &StepCapture<'_, S, R>,
    thread: ThreadId,
    value: &RuntimeValue,
) -> Option<ReturnedValue> {
    match value {
        RuntimeValue::Void => None,
        RuntimeValue::Null => {
            Some(ReturnedValue { type_name: VIRTUAL_TYPE.to_string(), rendered: "null".to_string() })
        }
        value => Some(ReturnedValue {
            type_name: value.simple_type_name(),
            rendered: capture.render_returned(thread, value),
        }),
    }
}
