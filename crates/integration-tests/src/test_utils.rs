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

//! Test utilities for integration tests

/// Initialization utilities for tests
pub mod init {
    /// Initialize logging for a test
    pub fn init_test_environment() {
        etrace_common::logging::ensure_test_logging(None);
    }
}

/// A [`DebugSession`](etrace_engine::DebugSession) replaying scripted event batches
pub mod session {
    use std::{
        collections::{HashMap, HashSet, VecDeque},
        sync::Arc,
    };

    use etrace_common::types::MethodSignature;
    use etrace_engine::{
        ChannelEventSource, DebugSession, EvalError, Evaluation, EventBatch, FrameId, FrameInfo,
        Location, RuntimeValue, ThreadId,
    };
    use eyre::eyre;
    use futures::{future::BoxFuture, FutureExt};
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    /// Target state visible while one batch is suspended
    #[derive(Debug, Clone, Default)]
    pub struct SuspendState {
        /// Stack of the stepping thread, innermost first
        pub frames: Vec<FrameInfo>,
        /// Expression values per frame
        pub values: HashMap<(FrameId, String), Evaluation>,
        /// Receiver object per frame
        pub receivers: HashMap<FrameId, RuntimeValue>,
    }

    /// Events delivered together, plus the state they are observed in
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedBatch {
        /// The events
        pub events: EventBatch,
        /// The suspended target
        pub state: SuspendState,
    }

    /// Static shape of the scripted target
    #[derive(Debug, Clone, Default)]
    pub struct TargetProgram {
        /// Executable `(class, line)` pairs
        pub lines: HashSet<(String, usize)>,
        /// Object fields by heap id
        pub fields: HashMap<u64, Vec<(String, RuntimeValue)>>,
        /// Array elements by heap id
        pub arrays: HashMap<u64, Vec<RuntimeValue>>,
    }

    /// Everything the engine asked of the session
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct SessionLog {
        /// Batches handed to the engine
        pub batches_delivered: usize,
        /// Calls to `resume`
        pub resumes: usize,
        /// Whether `terminate` was called
        pub terminated: bool,
        /// Whether exception events were requested
        pub exceptions_watched: bool,
        /// Every method-watch toggle, in order
        pub method_watches: Vec<bool>,
        /// Every step-watch toggle, in order
        pub step_watches: Vec<(ThreadId, bool)>,
    }

    /// Feeds batches into a streaming [`ScriptedSession`]
    #[derive(Debug, Clone)]
    pub struct ScriptHandle {
        tx: mpsc::Sender<EventBatch>,
        states: Arc<Mutex<VecDeque<SuspendState>>>,
    }

    impl ScriptHandle {
        /// Deliver `batch` to the session
        pub async fn send(&self, batch: ScriptedBatch) -> eyre::Result<()> {
            self.states.lock().push_back(batch.state);
            self.tx.send(batch.events).await.map_err(|_| eyre!("scripted session dropped"))
        }
    }

    /// Scripted debug session
    #[derive(Debug)]
    pub struct ScriptedSession {
        source: ChannelEventSource,
        states: Arc<Mutex<VecDeque<SuspendState>>>,
        current: SuspendState,
        program: TargetProgram,
        log: Arc<Mutex<SessionLog>>,
    }

    impl ScriptedSession {
        /// A session fed batch by batch through the returned handle
        pub fn streaming(program: TargetProgram, capacity: usize) -> (ScriptHandle, Self) {
            let (tx, source) = ChannelEventSource::new(capacity);
            let states = Arc::new(Mutex::new(VecDeque::new()));
            let handle = ScriptHandle { tx, states: states.clone() };
            let session = Self {
                source,
                states,
                current: SuspendState::default(),
                program,
                log: Arc::default(),
            };
            (handle, session)
        }

        /// A session replaying `batches`, closing once they are drained
        pub fn from_batches(program: TargetProgram, batches: Vec<ScriptedBatch>) -> Self {
            let (handle, session) = Self::streaming(program, batches.len());
            for batch in batches {
                handle.states.lock().push_back(batch.state);
                // Capacity covers every batch.
                let _ = handle.tx.try_send(batch.events);
            }
            session
        }

        /// Shared view of the session log
        pub fn log(&self) -> Arc<Mutex<SessionLog>> {
            self.log.clone()
        }
    }

    impl DebugSession for ScriptedSession {
        fn next_batch(&mut self) -> BoxFuture<'_, eyre::Result<Option<EventBatch>>> {
            async move {
                let Some(events) = self.source.recv().await else {
                    return Ok(None);
                };
                self.current = self.states.lock().pop_front().unwrap_or_default();
                self.log.lock().batches_delivered += 1;
                Ok(Some(events))
            }
            .boxed()
        }

        fn resume(&mut self) -> eyre::Result<()> {
            self.log.lock().resumes += 1;
            Ok(())
        }

        fn set_step_watch(&mut self, thread: ThreadId, enabled: bool) {
            self.log.lock().step_watches.push((thread, enabled));
        }

        fn set_method_watches(&mut self, enabled: bool) {
            self.log.lock().method_watches.push(enabled);
        }

        fn watch_exceptions(&mut self) {
            self.log.lock().exceptions_watched = true;
        }

        fn line_location(&self, class_name: &str, line: usize) -> Option<Location> {
            self.program.lines.contains(&(class_name.to_string(), line)).then(|| {
                Location::new(MethodSignature::new(class_name, "<scripted>", "()V"), line as i64, 0)
            })
        }

        fn frames(&self, _thread: ThreadId) -> Result<Vec<FrameInfo>, EvalError> {
            Ok(self.current.frames.clone())
        }

        fn evaluate(
            &self,
            _thread: ThreadId,
            frame: FrameId,
            expression: &str,
        ) -> Result<Evaluation, EvalError> {
            self.current
                .values
                .get(&(frame, expression.to_string()))
                .cloned()
                .ok_or_else(|| EvalError::NotAvailable(expression.to_string()))
        }

        fn this_object(
            &self,
            _thread: ThreadId,
            frame: FrameId,
        ) -> Result<Option<RuntimeValue>, EvalError> {
            Ok(self.current.receivers.get(&frame).cloned())
        }

        fn fields(
            &self,
            _thread: ThreadId,
            heap_id: u64,
        ) -> Result<Vec<(String, RuntimeValue)>, EvalError> {
            self.program
                .fields
                .get(&heap_id)
                .cloned()
                .ok_or_else(|| EvalError::NotAvailable(format!("object {heap_id}")))
        }

        fn array_elements(
            &self,
            _thread: ThreadId,
            heap_id: u64,
        ) -> Result<Vec<RuntimeValue>, EvalError> {
            self.program
                .arrays
                .get(&heap_id)
                .cloned()
                .ok_or_else(|| EvalError::NotAvailable(format!("array {heap_id}")))
        }

        fn terminate(&mut self) {
            self.log.lock().terminated = true;
        }
    }
}

/// Builder for scripted program executions
pub mod program {
    use std::collections::HashMap;

    use etrace_engine::{
        DebugEvent, Evaluation, FrameId, FrameInfo, Location, MethodInfo, RuntimeValue, ThreadId,
    };

    use super::session::{ScriptedBatch, ScriptedSession, SuspendState, TargetProgram};

    #[derive(Debug, Clone)]
    struct ScriptFrame {
        id: FrameId,
        method: MethodInfo,
        line: i64,
        values: HashMap<String, Evaluation>,
        receiver: Option<RuntimeValue>,
    }

    impl ScriptFrame {
        fn location(&self) -> Location {
            Location::new(self.method.signature.clone(), self.line, 0)
        }
    }

    /// Scripts one thread's execution as a sequence of suspended batches.
    ///
    /// Values set with [`set`](Self::set) stay visible in their frame until changed,
    /// so a value set before a `step` is what that step observes.
    #[derive(Debug, Clone)]
    pub struct ProgramScript {
        thread: ThreadId,
        program: TargetProgram,
        batches: Vec<ScriptedBatch>,
        stack: Vec<ScriptFrame>,
        next_frame: u64,
    }

    impl Default for ProgramScript {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ProgramScript {
        /// An empty script on thread 1
        pub fn new() -> Self {
            Self {
                thread: ThreadId(1),
                program: TargetProgram::default(),
                batches: Vec::new(),
                stack: Vec::new(),
                next_frame: 1,
            }
        }

        /// The scripted thread
        pub fn thread(&self) -> ThreadId {
            self.thread
        }

        /// Declare executable lines of `class_name`
        pub fn with_lines(mut self, class_name: &str, lines: impl IntoIterator<Item = usize>) -> Self {
            for line in lines {
                self.program.lines.insert((class_name.to_string(), line));
            }
            self
        }

        /// Declare the fields of object `heap_id`
        pub fn with_object(mut self, heap_id: u64, fields: Vec<(&str, RuntimeValue)>) -> Self {
            let fields = fields.into_iter().map(|(name, value)| (name.to_string(), value)).collect();
            self.program.fields.insert(heap_id, fields);
            self
        }

        /// Declare the elements of array `heap_id`
        pub fn with_array(mut self, heap_id: u64, elements: Vec<RuntimeValue>) -> Self {
            self.program.arrays.insert(heap_id, elements);
            self
        }

        /// VM start followed by the preparation of `classes`
        pub fn start(mut self, classes: &[&str]) -> Self {
            let mut events = vec![DebugEvent::VmStart { thread: self.thread }];
            events.extend(
                classes.iter().map(|class| DebugEvent::ClassPrepare { class_name: class.to_string() }),
            );
            self.push(events);
            self
        }

        /// Prepare one more class
        pub fn prepare(mut self, class_name: &str) -> Self {
            self.push(vec![DebugEvent::ClassPrepare { class_name: class_name.to_string() }]);
            self
        }

        /// Enter `method` at `line` with the given arguments visible in the new frame
        pub fn call(mut self, method: MethodInfo, line: i64, args: &[(&str, RuntimeValue)]) -> Self {
            let id = FrameId(self.next_frame);
            self.next_frame += 1;
            let values =
                args.iter().map(|(name, value)| (name.to_string(), Evaluation::of(value.clone()))).collect();
            let frame = ScriptFrame { id, method: method.clone(), line, values, receiver: None };
            let location = frame.location();
            self.stack.push(frame);
            self.push(vec![DebugEvent::MethodEntry { thread: self.thread, location, method }]);
            self
        }

        /// Set the receiver of the current frame
        pub fn receiver(mut self, this: RuntimeValue) -> Self {
            if let Some(top) = self.stack.last_mut() {
                top.receiver = Some(this);
            }
            self
        }

        /// Make `expression` evaluate to `value` in the current frame
        pub fn set(self, expression: &str, value: RuntimeValue) -> Self {
            self.set_evaluation(expression, Evaluation::of(value))
        }

        /// Make `expression` evaluate to `value`, read from `parent`
        pub fn set_member(self, expression: &str, value: RuntimeValue, parent: RuntimeValue) -> Self {
            self.set_evaluation(expression, Evaluation::member_of(value, parent))
        }

        fn set_evaluation(mut self, expression: &str, evaluation: Evaluation) -> Self {
            if let Some(top) = self.stack.last_mut() {
                top.values.insert(expression.to_string(), evaluation);
            }
            self
        }

        /// Step the current frame onto `line`
        pub fn step(mut self, line: i64) -> Self {
            if let Some(top) = self.stack.last_mut() {
                top.line = line;
                let location = top.location();
                self.push(vec![DebugEvent::Step { thread: self.thread, location }]);
            }
            self
        }

        /// Return `value` from the current frame, at its current line
        pub fn ret(mut self, value: RuntimeValue) -> Self {
            if let Some(top) = self.stack.last() {
                let event = DebugEvent::MethodExit {
                    thread: self.thread,
                    location: top.location(),
                    method: top.method.clone(),
                    return_value: value,
                };
                self.push(vec![event]);
                self.stack.pop();
            }
            self
        }

        /// Throw from the current frame. With `catch = Some((depth, line))` the exception
        /// is caught at `line` of the frame `depth` levels below the top, and every frame
        /// above it is discarded; with `None` it is uncaught.
        pub fn throw(mut self, catch: Option<(usize, i64)>) -> Self {
            let Some(location) = self.stack.last().map(|top| top.location()) else {
                return self;
            };
            let catch_index = catch.and_then(|(depth, line)| {
                let index = self.stack.len().checked_sub(depth + 1)?;
                Some((index, line))
            });
            let catch_location = catch_index.map(|(index, line)| {
                Location::new(self.stack[index].method.signature.clone(), line, 0)
            });
            self.push(vec![DebugEvent::Exception { thread: self.thread, location, catch_location }]);

            if let Some((index, line)) = catch_index {
                self.stack.truncate(index + 1);
                self.stack[index].line = line;
            }
            self
        }

        /// The target terminates
        pub fn death(mut self) -> Self {
            self.push(vec![DebugEvent::VmDeath]);
            self
        }

        /// Deliver raw events in the current state
        pub fn raw(mut self, events: Vec<DebugEvent>) -> Self {
            self.push(events);
            self
        }

        /// The target program and the scripted batches
        pub fn into_parts(self) -> (TargetProgram, Vec<ScriptedBatch>) {
            (self.program, self.batches)
        }

        /// A session replaying this script
        pub fn into_session(self) -> ScriptedSession {
            let (program, batches) = self.into_parts();
            ScriptedSession::from_batches(program, batches)
        }

        fn push(&mut self, events: Vec<DebugEvent>) {
            let state = self.snapshot();
            self.batches.push(ScriptedBatch { events, state });
        }

        fn snapshot(&self) -> SuspendState {
            let mut state = SuspendState::default();
            for frame in self.stack.iter().rev() {
                state.frames.push(FrameInfo { id: frame.id, location: frame.location() });
                for (expression, evaluation) in &frame.values {
                    state.values.insert((frame.id, expression.clone()), evaluation.clone());
                }
                if let Some(receiver) = &frame.receiver {
                    state.receivers.insert(frame.id, receiver.clone());
                }
            }
            state
        }
    }
}

/// Engine runners over scripted sessions
pub mod engine {
    use etrace_common::types::BreakPoint;
    use etrace_engine::{EngineConfig, IndexedResolver, TraceEngine, TraceOutcome};
    use tracing::info;

    use super::{program::ProgramScript, session::SessionLog};

    /// Outcome of a scripted run plus what the engine asked of the session
    #[derive(Debug)]
    pub struct ScriptRun {
        /// The engine's result
        pub outcome: TraceOutcome,
        /// Session interactions
        pub log: SessionLog,
    }

    /// Run the engine over `script`, expecting the breakpoints `points` in order
    pub async fn run_script(
        config: EngineConfig,
        script: ProgramScript,
        resolver: IndexedResolver,
        points: Vec<BreakPoint>,
    ) -> eyre::Result<ScriptRun> {
        let session = script.into_session();
        let log = session.log();
        let outcome = TraceEngine::new(config, session, resolver, points).run().await?;
        info!(nodes = outcome.trace.len(), stop_reason = %outcome.stop_reason, "scripted run finished");
        if std::env::var(etrace_common::ETRACE_PRINT_TRACE).is_ok() {
            outcome.trace.print_trace_tree();
        }
        let log = log.lock().clone();
        Ok(ScriptRun { outcome, log })
    }
}
