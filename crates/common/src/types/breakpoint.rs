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

use std::{fmt::Display, str::FromStr};

use eyre::{bail, eyre, Error, Result};
use serde::{Deserialize, Serialize};

use super::{declaring_unit_of, Variable};

/// A statically chosen source line the engine must capture, together with the
/// candidate variables it reads and writes.
///
/// Breakpoints are immutable once built and shared (behind an `Arc`) by every
/// [`TraceNode`](super::TraceNode) recorded at their location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BreakPoint {
    /// Class containing the line
    pub class_name: String,
    /// Compilation unit declaring the class
    pub declaring_unit: String,
    /// Source line (1-based)
    pub line: usize,
    /// Name and descriptor of the enclosing method, e.g. `add(II)I`
    pub method_sign: Option<String>,
    /// Candidate variables read at this line
    pub read_variables: Vec<Variable>,
    /// Candidate variables written at this line
    pub written_variables: Vec<Variable>,
    /// Whether the line is a `return` statement
    pub is_return: bool,
}

impl BreakPoint {
    /// Create a breakpoint at `class_name:line` with no candidate variables
    pub fn new(class_name: impl Into<String>, line: usize) -> Self {
        let class_name = class_name.into();
        let declaring_unit = declaring_unit_of(&class_name).to_string();
        Self {
            class_name,
            declaring_unit,
            line,
            method_sign: None,
            read_variables: Vec::new(),
            written_variables: Vec::new(),
            is_return: false,
        }
    }

    /// Set the enclosing method signature
    pub fn with_method_sign(mut self, method_sign: impl Into<String>) -> Self {
        self.method_sign = Some(method_sign.into());
        self
    }

    /// Add a candidate read variable
    pub fn with_read(mut self, var: Variable) -> Self {
        self.read_variables.push(var);
        self
    }

    /// Add a candidate written variable
    pub fn with_written(mut self, var: Variable) -> Self {
        self.written_variables.push(var);
        self
    }

    /// Mark the line as a `return` statement
    pub fn with_return(mut self) -> Self {
        self.is_return = true;
        self
    }

    /// Whether this breakpoint sits at `class_name:line`
    pub fn is_at(&self, class_name: &str, line: usize) -> bool {
        self.line == line && self.class_name == class_name
    }
}

impl Display for BreakPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.class_name, self.line)?;
        if self.is_return {
            write!(f, " return")?;
        }
        Ok(())
    }
}

impl FromStr for BreakPoint {
    type Err = Error;

    /// Parses a breakpoint location.
    /// Format: `<class>:<line> [return]`
    /// Examples:
    /// - `com.example.Calc:12`
    /// - `com.example.Calc$Inner:40 return`
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let (loc, is_return) = match trimmed.strip_suffix("return") {
            Some(rest) if rest.ends_with(' ') => (rest.trim_end(), true),
            _ => (trimmed, false),
        };

        let Some((class_name, line)) = loc.rsplit_once(':') else {
            bail!("Invalid breakpoint format. Expected <class>:<line> [return], got: {s}");
        };
        if class_name.is_empty() || class_name.contains(char::is_whitespace) {
            bail!("Invalid class name in breakpoint: {class_name:?}");
        }
        let line = line.parse::<usize>().map_err(|e| eyre!("Invalid line number: {e}"))?;
        if line == 0 {
            bail!("Line numbers are 1-based");
        }

        let mut point = Self::new(class_name, line);
        point.is_return = is_return;
        Ok(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_location() {
        let point: BreakPoint = "com.example.Calc:12".parse().unwrap();
        assert_eq!(point.class_name, "com.example.Calc");
        assert_eq!(point.declaring_unit, "com.example.Calc");
        assert_eq!(point.line, 12);
        assert!(!point.is_return);
        assert!(point.is_at("com.example.Calc", 12));
    }

    #[test]
    fn test_parse_nested_return() {
        let point: BreakPoint = " com.example.Calc$Inner:40 return ".parse().unwrap();
        assert_eq!(point.class_name, "com.example.Calc$Inner");
        assert_eq!(point.declaring_unit, "com.example.Calc");
        assert!(point.is_return);
        assert_eq!(point.to_string(), "com.example.Calc$Inner:40 return");
    }

    #[test]
    fn test_parse_errors() {
        assert!("com.example.Calc".parse::<BreakPoint>().is_err());
        assert!("com.example.Calc:abc".parse::<BreakPoint>().is_err());
        assert!("com.example.Calc:0".parse::<BreakPoint>().is_err());
        assert!(":3".parse::<BreakPoint>().is_err());
        assert!("com.example.Calc:3 returns".parse::<BreakPoint>().is_err());
    }

    #[test]
    fn test_builder() {
        let point = BreakPoint::new("A", 3)
            .with_method_sign("run()V")
            .with_read(Variable::local("x", "int"))
            .with_written(Variable::local("y", "int"))
            .with_return();
        assert_eq!(point.method_sign.as_deref(), Some("run()V"));
        assert_eq!(point.read_variables.len(), 1);
        assert_eq!(point.written_variables.len(), 1);
        assert!(point.is_return);
    }
}
