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

//! Interface to the debug event source.
//!
//! The engine never talks to a debugger wire protocol directly. Anything that can
//! deliver ordered [`EventBatch`]es, toggle watches, and evaluate expressions against
//! a suspended thread's frames implements [`DebugSession`].

use derive_more::{Display, From};
use etrace_common::types::{declaring_unit_of, simple_name, MethodSignature};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::EvalError;

/// Identifier of a target thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From)]
#[display("thread-{_0}")]
pub struct ThreadId(pub u64);

/// Identifier of a stack frame, unique while the frame is live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From)]
#[display("frame-{_0}")]
pub struct FrameId(pub u64);

/// An executable code location in the target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Declaring class
    pub class_name: String,
    /// Method containing the location
    pub method: MethodSignature,
    /// Source line, `-1` when the code has no line information
    pub line: i64,
    /// Bytecode offset inside the method
    pub code_index: u64,
}

impl Location {
    /// Create a location
    pub fn new(method: MethodSignature, line: i64, code_index: u64) -> Self {
        Self { class_name: method.class_name.clone(), method, line, code_index }
    }

    /// Source line, if the location carries line information
    pub fn line_number(&self) -> Option<usize> {
        usize::try_from(self.line).ok().filter(|&line| line > 0)
    }

    /// Compilation unit declaring the class
    pub fn declaring_unit(&self) -> &str {
        declaring_unit_of(&self.class_name)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.class_name, self.line)
    }
}

/// A declared method parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamInfo {
    /// Parameter name
    pub name: String,
    /// Declared type
    pub type_name: String,
}

impl ParamInfo {
    /// Create a parameter description
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self { name: name.into(), type_name: type_name.into() }
    }
}

/// Static information about a method, as reported with entry and exit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    /// Fully qualified signature
    pub signature: MethodSignature,
    /// First line of the method
    pub line: usize,
    /// Declared return type
    pub return_type: String,
    /// Declared parameters
    pub params: Vec<ParamInfo>,
}

impl MethodInfo {
    /// Create a method description
    pub fn new(signature: MethodSignature, line: usize) -> Self {
        Self { signature, line, return_type: "void".to_string(), params: Vec::new() }
    }

    /// Set the declared return type
    pub fn with_return_type(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = return_type.into();
        self
    }

    /// Add a declared parameter
    pub fn with_param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.params.push(ParamInfo::new(name, type_name));
        self
    }

    /// Declaring class
    pub fn class_name(&self) -> &str {
        &self.signature.class_name
    }

    /// Simple method name
    pub fn name(&self) -> &str {
        &self.signature.method_name
    }
}

/// A value read from the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeValue {
    /// A primitive value
    Primitive {
        /// Primitive type name, e.g. `int`
        type_name: String,
        /// Rendered value
        value: String,
    },
    /// The null reference
    Null,
    /// A string object
    Str {
        /// Heap identity
        heap_id: u64,
        /// Contents
        value: String,
    },
    /// Any other object
    Object {
        /// Heap identity
        heap_id: u64,
        /// Runtime type
        type_name: String,
    },
    /// An array
    Array {
        /// Heap identity
        heap_id: u64,
        /// Component type
        component_type: String,
        /// Number of elements
        length: usize,
    },
    /// Returned by methods declared `void`
    Void,
}

impl RuntimeValue {
    /// A primitive value
    pub fn primitive(type_name: impl Into<String>, value: impl ToString) -> Self {
        Self::Primitive { type_name: type_name.into(), value: value.to_string() }
    }

    /// Heap identity of strings, objects and arrays
    pub fn heap_id(&self) -> Option<u64> {
        match self {
            Self::Str { heap_id, .. } | Self::Object { heap_id, .. } | Self::Array { heap_id, .. } => {
                Some(*heap_id)
            }
            _ => None,
        }
    }

    /// Unqualified runtime type name
    pub fn simple_type_name(&self) -> String {
        match self {
            Self::Primitive { type_name, .. } => type_name.clone(),
            Self::Null => "null".to_string(),
            Self::Str { .. } => "String".to_string(),
            Self::Object { type_name, .. } => simple_name(type_name).to_string(),
            Self::Array { component_type, .. } => format!("{}[]", simple_name(component_type)),
            Self::Void => "void".to_string(),
        }
    }
}

/// Result of evaluating an expression: the value plus, for field and element
/// accesses, the object the value was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// The value of the expression
    pub value: RuntimeValue,
    /// The owner object of a field or element access
    pub parent: Option<RuntimeValue>,
}

impl Evaluation {
    /// An evaluation with no owner
    pub fn of(value: RuntimeValue) -> Self {
        Self { value, parent: None }
    }

    /// An evaluation of a member of `parent`
    pub fn member_of(value: RuntimeValue, parent: RuntimeValue) -> Self {
        Self { value, parent: Some(parent) }
    }
}

/// A suspended stack frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    /// Frame identity
    pub id: FrameId,
    /// Current location of the frame
    pub location: Location,
}

/// One event delivered by the debug event source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// The target started
    VmStart {
        /// Main thread
        thread: ThreadId,
    },
    /// A thread started
    ThreadStart {
        /// The new thread
        thread: ThreadId,
    },
    /// A class was loaded and prepared
    ClassPrepare {
        /// The class
        class_name: String,
    },
    /// A thread stepped onto a new line
    Step {
        /// Stepping thread
        thread: ThreadId,
        /// New location
        location: Location,
    },
    /// A method was entered
    MethodEntry {
        /// Calling thread
        thread: ThreadId,
        /// First location of the callee
        location: Location,
        /// The callee
        method: MethodInfo,
    },
    /// A method is about to return
    MethodExit {
        /// Returning thread
        thread: ThreadId,
        /// Location of the return
        location: Location,
        /// The returning method
        method: MethodInfo,
        /// The value being returned
        return_value: RuntimeValue,
    },
    /// An exception was thrown
    Exception {
        /// Throwing thread
        thread: ThreadId,
        /// Throw location
        location: Location,
        /// Where the exception will be caught, `None` when uncaught
        catch_location: Option<Location>,
    },
    /// The target terminated
    VmDeath,
    /// The debugger connection was lost
    VmDisconnect,
}

/// A batch of events delivered together, in no guaranteed order.
pub type EventBatch = Vec<DebugEvent>;

/// A live debug session against a running target.
///
/// All inspection methods assume the thread is suspended, which holds between
/// receiving a batch and calling [`resume`](Self::resume).
pub trait DebugSession: Send {
    /// Wait for the next event batch. `Ok(None)` means the source is exhausted.
    fn next_batch(&mut self) -> BoxFuture<'_, eyre::Result<Option<EventBatch>>>;

    /// Resume the target after a batch was fully processed
    fn resume(&mut self) -> eyre::Result<()>;

    /// Enable or disable line stepping on a thread
    fn set_step_watch(&mut self, thread: ThreadId, enabled: bool);

    /// Enable or disable method entry and exit events
    fn set_method_watches(&mut self, enabled: bool);

    /// Register for exception events
    fn watch_exceptions(&mut self);

    /// First code location of `class_name:line`, if the class has code there
    fn line_location(&self, class_name: &str, line: usize) -> Option<Location>;

    /// Stack frames of a suspended thread, innermost first
    fn frames(&self, thread: ThreadId) -> Result<Vec<FrameInfo>, EvalError>;

    /// Evaluate a variable, field access or array access against a frame
    fn evaluate(
        &self,
        thread: ThreadId,
        frame: FrameId,
        expression: &str,
    ) -> Result<Evaluation, EvalError>;

    /// The receiver object of a frame, `None` in static methods
    fn this_object(&self, thread: ThreadId, frame: FrameId)
        -> Result<Option<RuntimeValue>, EvalError>;

    /// Fields of an object
    fn fields(&self, thread: ThreadId, heap_id: u64) -> Result<Vec<(String, RuntimeValue)>, EvalError>;

    /// Elements of an array
    fn array_elements(&self, thread: ThreadId, heap_id: u64) -> Result<Vec<RuntimeValue>, EvalError>;

    /// Forcibly terminate the target
    fn terminate(&mut self);
}

/// Receiving end of an in-process event channel.
///
/// Event producers running on other threads or tasks push batches through the
/// [`mpsc::Sender`] returned by [`ChannelEventSource::new`]; a [`DebugSession`]
/// implementation drains them in its `next_batch`.
#[derive(Debug)]
pub struct ChannelEventSource {
    rx: mpsc::Receiver<EventBatch>,
}

impl ChannelEventSource {
    /// Create a bounded channel of `capacity` batches
    pub fn new(capacity: usize) -> (mpsc::Sender<EventBatch>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// Next batch, `None` once every sender is dropped and the channel is drained
    pub async fn recv(&mut self) -> Option<EventBatch> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_helpers() {
        let sig = MethodSignature::new("com.example.Outer$Inner", "run", "()V");
        let location = Location::new(sig.clone(), 12, 4);
        assert_eq!(location.class_name, "com.example.Outer$Inner");
        assert_eq!(location.declaring_unit(), "com.example.Outer");
        assert_eq!(location.line_number(), Some(12));
        assert_eq!(location.to_string(), "com.example.Outer$Inner:12");
        assert_eq!(Location::new(sig, -1, 0).line_number(), None);
    }

    #[test]
    fn test_runtime_value_helpers() {
        assert_eq!(RuntimeValue::primitive("int", 5).heap_id(), None);
        let list = RuntimeValue::Object { heap_id: 3, type_name: "java.util.ArrayList".into() };
        assert_eq!(list.heap_id(), Some(3));
        assert_eq!(list.simple_type_name(), "ArrayList");
        let arr = RuntimeValue::Array { heap_id: 4, component_type: "int".into(), length: 2 };
        assert_eq!(arr.simple_type_name(), "int[]");
        assert_eq!(ThreadId(1).to_string(), "thread-1");
        assert_eq!(FrameId::from(9).to_string(), "frame-9");
    }

    #[tokio::test]
    async fn test_channel_source_drains_then_closes() {
        let (tx, mut source) = ChannelEventSource::new(4);
        tx.send(vec![DebugEvent::VmStart { thread: ThreadId(1) }]).await.unwrap();
        tx.send(vec![DebugEvent::VmDeath]).await.unwrap();
        drop(tx);

        assert_eq!(source.recv().await, Some(vec![DebugEvent::VmStart { thread: ThreadId(1) }]));
        assert_eq!(source.recv().await, Some(vec![DebugEvent::VmDeath]));
        assert_eq!(source.recv().await, None);
    }
}
