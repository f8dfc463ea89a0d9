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

//! Static declared-variable resolver.
//!
//! The engine consults a [`StaticResolver`] for everything that can only be known
//! from source: method boundaries, lexical scopes of locals, and the candidate
//! variables of a line. [`IndexedResolver`] is an in-memory implementation over
//! precomputed interval indexes.

use std::{collections::HashMap, sync::Arc};

use auto_impl::auto_impl;
use etrace_common::types::{BreakPoint, Variable};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Line span of a method declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodBoundary {
    /// Simple method name
    pub name: String,
    /// First line of the declaration
    pub start_line: usize,
    /// Last line of the declaration
    pub end_line: usize,
}

impl MethodBoundary {
    /// Create a method boundary
    pub fn new(name: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self { name: name.into(), start_line, end_line }
    }

    /// Whether `line` falls inside the declaration
    pub fn contains(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    fn span(&self) -> usize {
        self.end_line.saturating_sub(self.start_line)
    }
}

/// Lexical scope of a local variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalScope {
    /// First line of the scope
    pub start_line: usize,
    /// Last line of the scope
    pub end_line: usize,
}

impl LocalScope {
    /// Create a scope
    pub fn new(start_line: usize, end_line: usize) -> Self {
        Self { start_line, end_line }
    }

    /// Whether `line` falls inside the scope
    pub fn contains(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

impl From<&MethodBoundary> for LocalScope {
    fn from(method: &MethodBoundary) -> Self {
        Self::new(method.start_line, method.end_line)
    }
}

/// Variables a single line statically reads, writes and returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineVariables {
    /// Read candidates
    pub read: Vec<Variable>,
    /// Written candidates
    pub written: Vec<Variable>,
    /// Expression returned by the line, if it is a return statement
    pub returned: Option<Variable>,
}

/// Source-level oracle consulted by the engine.
#[auto_impl(&, Box, Arc)]
pub trait StaticResolver {
    /// Innermost method declaration of `unit` containing `line`
    fn enclosing_method(&self, unit: &str, line: usize) -> Option<MethodBoundary>;

    /// Lexical scope of local `name` visible at `line` of `unit`
    fn local_scope(&self, unit: &str, name: &str, line: usize) -> Option<LocalScope>;

    /// Candidate variables of `class_name:line` at bytecode offset `code_index`
    fn line_variables(&self, class_name: &str, line: usize, code_index: u64)
        -> Option<LineVariables>;

    /// Whether the method enclosing `method_line` also contains `line`
    fn method_contains(&self, unit: &str, method_line: usize, line: usize) -> bool {
        self.enclosing_method(unit, method_line).is_some_and(|method| method.contains(line))
    }
}

/// Fill a breakpoint's candidate variables from the resolver when it declares none.
pub fn populate_breakpoint<R: StaticResolver>(mut point: BreakPoint, resolver: &R) -> Arc<BreakPoint> {
    if point.read_variables.is_empty() && point.written_variables.is_empty() {
        if let Some(vars) = resolver.line_variables(&point.class_name, point.line, 0) {
            point.read_variables = vars.read;
            point.written_variables = vars.written;
        }
    }
    Arc::new(point)
}

/// Per-unit interval index of method declarations.
#[derive(Debug, Clone, Default)]
pub struct MethodIndex {
    inner: IndexMap<String, Vec<MethodBoundary>>,
}

impl MethodIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method of `unit`
    pub fn insert(&mut self, unit: impl Into<String>, method: MethodBoundary) {
        let methods = self.inner.entry(unit.into()).or_default();
        let pos = methods.partition_point(|m| m.start_line <= method.start_line);
        methods.insert(pos, method);
    }

    /// Innermost method of `unit` containing `line`
    pub fn innermost(&self, unit: &str, line: usize) -> Option<&MethodBoundary> {
        let methods = self.inner.get(unit)?;
        // Sorted by start, so nothing past the first method starting after `line` can contain it.
        let candidates = &methods[..methods.partition_point(|m| m.start_line <= line)];
        candidates.iter().filter(|m| m.contains(line)).min_by_key(|m| m.span())
    }
}

/// In-memory [`StaticResolver`].
///
/// Line variables are indexed per line; the bytecode offset is not distinguished.
#[derive(Debug, Clone, Default)]
pub struct IndexedResolver {
    methods: MethodIndex,
    scopes: HashMap<(String, String), Vec<LocalScope>>,
    lines: HashMap<(String, usize), LineVariables>,
}

impl IndexedResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare method `name` spanning `start..=end` in `unit`
    pub fn with_method(mut self, unit: &str, name: &str, start: usize, end: usize) -> Self {
        self.methods.insert(unit, MethodBoundary::new(name, start, end));
        self
    }

    /// Declare local `name` of `unit` visible on `start..=end`
    pub fn with_local_scope(mut self, unit: &str, name: &str, start: usize, end: usize) -> Self {
        self.scopes
            .entry((unit.to_string(), name.to_string()))
            .or_default()
            .push(LocalScope::new(start, end));
        self
    }

    /// Declare the candidate variables of `class_name:line`
    pub fn with_line_variables(mut self, class_name: &str, line: usize, vars: LineVariables) -> Self {
        self.lines.insert((class_name.to_string(), line), vars);
        self
    }
}

impl StaticResolver for IndexedResolver {
    fn enclosing_method(&self, unit: &str, line: usize) -> Option<MethodBoundary> {
        self.methods.innermost(unit, line).cloned()
    }

    fn local_scope(&self, unit: &str, name: &str, line: usize) -> Option<LocalScope> {
        self.scopes
            .get(&(unit.to_string(), name.to_string()))?
            .iter()
            .filter(|scope| scope.contains(line))
            .min_by_key(|scope| scope.end_line.saturating_sub(scope.start_line))
            .copied()
    }

    fn line_variables(
        &self,
        class_name: &str,
        line: usize,
        _code_index: u64,
    ) -> Option<LineVariables> {
        self.lines.get(&(class_name.to_string(), line)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> IndexedResolver {
        IndexedResolver::new()
            .with_method("Calc", "outer", 1, 30)
            .with_method("Calc", "lambda$0", 10, 12)
            .with_method("Calc", "helper", 40, 50)
            .with_local_scope("Calc", "i", 3, 8)
            .with_local_scope("Calc", "i", 20, 25)
            .with_local_scope("Calc", "x", 1, 30)
            .with_local_scope("Calc", "x", 5, 6)
    }

    #[test]
    fn test_innermost_method() {
        let resolver = resolver();
        assert_eq!(resolver.enclosing_method("Calc", 11).unwrap().name, "lambda$0");
        assert_eq!(resolver.enclosing_method("Calc", 13).unwrap().name, "outer");
        assert_eq!(resolver.enclosing_method("Calc", 45).unwrap().name, "helper");
        assert!(resolver.enclosing_method("Calc", 35).is_none());
        assert!(resolver.enclosing_method("Other", 11).is_none());
    }

    #[test]
    fn test_method_contains() {
        let resolver = resolver();
        assert!(resolver.method_contains("Calc", 2, 29));
        assert!(!resolver.method_contains("Calc", 11, 20));
        assert!(!resolver.method_contains("Calc", 35, 36));
    }

    #[test]
    fn test_local_scope_picks_innermost_visible() {
        let resolver = resolver();
        assert_eq!(resolver.local_scope("Calc", "i", 4), Some(LocalScope::new(3, 8)));
        assert_eq!(resolver.local_scope("Calc", "i", 21), Some(LocalScope::new(20, 25)));
        assert_eq!(resolver.local_scope("Calc", "i", 15), None);
        assert_eq!(resolver.local_scope("Calc", "x", 5), Some(LocalScope::new(5, 6)));
        assert_eq!(resolver.local_scope("Calc", "x", 7), Some(LocalScope::new(1, 30)));
    }

    #[test]
    fn test_populate_breakpoint() {
        let resolver = resolver().with_line_variables(
            "Calc",
            4,
            LineVariables {
                read: vec![Variable::local("i", "int")],
                written: vec![Variable::local("x", "int")],
                returned: None,
            },
        );

        let populated = populate_breakpoint(BreakPoint::new("Calc", 4), &resolver);
        assert_eq!(populated.read_variables, vec![Variable::local("i", "int")]);
        assert_eq!(populated.written_variables, vec![Variable::local("x", "int")]);

        let declared = BreakPoint::new("Calc", 4).with_read(Variable::local("y", "int"));
        let kept = populate_breakpoint(declared, &resolver);
        assert_eq!(kept.read_variables, vec![Variable::local("y", "int")]);
        assert!(kept.written_variables.is_empty());
    }
}
