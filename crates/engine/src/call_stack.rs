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

//! Call-stack tracker
//!
//! Keeps the still-open invocations whose call site is a node in the trace, as
//! `(call site order, callee signature)` pairs, and implements the two recovery
//! algorithms: signature-mismatch popping on method exit, and unwinding to the
//! catching method after an exception.

use etrace_common::{etrace_assert, types::MethodSignature};
use tracing::{debug, warn};

/// An open invocation: the node that made the call and the method it called
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationFrame {
    /// Order of the call-site node
    pub call_site: usize,
    /// Signature of the callee
    pub signature: MethodSignature,
}

/// Result of matching a method exit against the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopOutcome {
    /// Frames were popped; `call_site` is the call site of the exiting invocation
    Popped {
        /// Call site of the matched frame
        call_site: usize,
        /// Number of frames removed, including unmatched ones above the match
        popped: usize,
    },
    /// No open invocation has the exiting signature; nothing was popped
    Unmatched,
}

/// Stack of open invocations, innermost last
#[derive(Debug, Clone, Default)]
pub struct CallStack {
    frames: Vec<InvocationFrame>,
}

impl CallStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open invocations
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no invocation is open
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Innermost open invocation
    pub fn top(&self) -> Option<&InvocationFrame> {
        self.frames.last()
    }

    /// Open invocations, outermost first
    pub fn frames(&self) -> &[InvocationFrame] {
        &self.frames
    }

    /// Open an invocation of `signature` made by node `call_site`
    pub fn push(&mut self, call_site: usize, signature: MethodSignature) {
        etrace_assert!(
            self.top().is_none_or(|top| top.call_site <= call_site),
            "call sites are pushed in execution order"
        );
        debug!(call_site, %signature, depth = self.frames.len() + 1, "push invocation");
        self.frames.push(InvocationFrame { call_site, signature });
    }

    /// Close the invocation of `signature`.
    ///
    /// If the innermost frame does not match, the stack is scanned downward and every
    /// frame above and including the nearest match is removed. This recovers from
    /// nested invocations whose exit was never observed.
    pub fn pop_matching(&mut self, signature: &MethodSignature) -> PopOutcome {
        let Some(index) = self.frames.iter().rposition(|frame| &frame.signature == signature) else {
            if !self.frames.is_empty() {
                warn!(%signature, depth = self.frames.len(), "method exit matches no open invocation");
            }
            return PopOutcome::Unmatched;
        };

        let popped = self.frames.len() - index;
        if popped > 1 {
            debug!(%signature, popped, "recovered from unmatched nested invocations");
        }
        let call_site = self.frames[index].call_site;
        self.frames.truncate(index);
        PopOutcome::Popped { call_site, popped }
    }

    /// Unwind after an exception until `contains_catch` accepts a node.
    ///
    /// `contains_catch` is first asked about `start` (the node that threw). While it
    /// rejects the node, the innermost invocation is popped and its call site is asked
    /// next. Returns the call site of the last popped invocation, if any.
    pub fn unwind_until<F>(&mut self, start: usize, mut contains_catch: F) -> Option<usize>
    where
        F: FnMut(usize) -> bool,
    {
        let mut just_popped = None;
        let mut node = start;
        while !contains_catch(node) {
            let Some(frame) = self.frames.pop() else {
                break;
            };
            debug!(call_site = frame.call_site, signature = %frame.signature, "unwound by exception");
            node = frame.call_site;
            just_popped = Some(frame.call_site);
        }
        just_popped
    }
}
