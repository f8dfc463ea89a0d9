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

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::Variable;

/// A captured runtime value.
///
/// References and arrays are expanded into their fields/elements up to the configured
/// variable layer; anything deeper is kept as an unexpanded reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueSnapshot {
    /// A primitive value, or `null`
    Primitive {
        /// Rendered value
        value: String,
    },
    /// A string object
    Str {
        /// String contents, unquoted
        value: String,
    },
    /// An object reference
    Reference {
        /// Unique heap identity of the object
        heap_id: u64,
        /// Runtime type of the object
        type_name: String,
        /// Expanded fields, sorted by name
        fields: Vec<NamedValue>,
    },
    /// An array reference
    Array {
        /// Unique heap identity of the array
        heap_id: u64,
        /// Component type
        component_type: String,
        /// Expanded elements, named by index
        elements: Vec<NamedValue>,
    },
    /// Value of a synthesized return-value variable
    Virtual {
        /// Rendered returned value
        value: String,
    },
}

impl ValueSnapshot {
    /// Snapshot of a `null` value
    pub fn null() -> Self {
        Self::Primitive { value: "null".to_string() }
    }

    /// Heap identity for references, arrays
    pub fn heap_id(&self) -> Option<u64> {
        match self {
            Self::Reference { heap_id, .. } | Self::Array { heap_id, .. } => Some(*heap_id),
            _ => None,
        }
    }

    /// Human readable rendering. Expanded references and arrays render as `[name=value,...]`.
    pub fn display_string(&self) -> String {
        match self {
            Self::Primitive { value } | Self::Str { value } | Self::Virtual { value } => {
                value.clone()
            }
            Self::Reference { fields: children, .. } | Self::Array { elements: children, .. } => {
                format!(
                    "[{}]",
                    children
                        .iter()
                        .map(|child| format!("{}={}", child.name, child.value.display_string()))
                        .join(",")
                )
            }
        }
    }
}

impl std::fmt::Display for ValueSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_string())
    }
}

/// A field or element inside an expanded snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedValue {
    /// Field name, or element index
    pub name: String,
    /// Captured value
    pub value: ValueSnapshot,
}

impl NamedValue {
    /// Create a new named value
    pub fn new(name: impl Into<String>, value: ValueSnapshot) -> Self {
        Self { name: name.into(), value }
    }
}

/// A variable captured at a step: its static declaration, its resolved identity
/// (`var_id`) and the value observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarValue {
    /// Static declaration
    pub variable: Variable,
    /// Resolved cross-step identity
    pub var_id: String,
    /// Observed value
    pub value: ValueSnapshot,
}

impl VarValue {
    /// Create a new variable value
    pub fn new(variable: Variable, var_id: impl Into<String>, value: ValueSnapshot) -> Self {
        Self { variable, var_id: var_id.into(), value }
    }

    /// Declared name of the variable
    pub fn name(&self) -> &str {
        self.variable.name()
    }

    /// Rendered value
    pub fn string_value(&self) -> String {
        self.value.display_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_string_of_nested_reference() {
        let point = ValueSnapshot::Reference {
            heap_id: 7,
            type_name: "Point".into(),
            fields: vec![
                NamedValue::new("x", ValueSnapshot::Primitive { value: "1".into() }),
                NamedValue::new(
                    "tags",
                    ValueSnapshot::Array {
                        heap_id: 9,
                        component_type: "String".into(),
                        elements: vec![NamedValue::new(
                            "0",
                            ValueSnapshot::Str { value: "a".into() },
                        )],
                    },
                ),
            ],
        };

        assert_eq!(point.display_string(), "[x=1,tags=[0=a]]");
        assert_eq!(point.heap_id(), Some(7));
        assert_eq!(ValueSnapshot::null().to_string(), "null");
        assert_eq!(ValueSnapshot::null().heap_id(), None);
    }
}
