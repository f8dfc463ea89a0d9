//! ETrace Engine - turns a stream of debug events into an execution trace.
//!
//! The [`TraceEngine`] consumes event batches from a [`DebugSession`], tracks the
//! invocation stack, captures read and written variables in two phases, resolves a
//! stable identity for every variable instance and assembles the resulting
//! [`Trace`](etrace_common::types::Trace).

pub mod assembler;
pub use assembler::*;

pub mod call_stack;
pub use call_stack::*;

pub mod capture;
pub use capture::*;

pub mod config;
pub use config::*;

pub mod context;
pub use context::*;

pub mod core;
pub use self::core::*;

pub mod error;
pub use error::*;

pub mod identity;
pub use identity::*;

pub mod library;
pub use library::*;

pub mod resolver;
pub use resolver::*;

pub mod sequencer;
pub use sequencer::*;

pub mod session;
pub use session::*;
