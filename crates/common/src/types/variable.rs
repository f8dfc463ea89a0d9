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

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Prefix shared by the identity and display name of synthesized return-value variables.
pub const VIRTUAL_PREFIX: &str = "virtual:";

/// Declared type of a virtual variable whose returned value was never observed.
pub const VIRTUAL_TYPE: &str = "virtual_type";

/// Whether a variable is being read or written at a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Access {
    /// The step reads the variable
    #[display("read")]
    Read,
    /// The step writes the variable
    #[display("written")]
    Written,
}

/// Static description of a storage location, as declared at a breakpoint.
///
/// Everything except [`Variable::Virtual`] can be evaluated against a live stack frame
/// through its [`expression`](Self::expression).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Variable {
    /// A method-local variable
    Local {
        /// Variable name
        name: String,
        /// Declared type
        var_type: String,
    },
    /// An instance or static field. `name` is the access expression, e.g. `this.count`.
    Field {
        /// Access expression
        name: String,
        /// Declared type
        var_type: String,
        /// Class declaring the field
        declaring_type: String,
        /// Whether the field is static
        is_static: bool,
    },
    /// An array element. `name` is the access expression (`values[i]`) and `index`
    /// the index expression (`i`).
    ArrayElement {
        /// Access expression
        name: String,
        /// Component type
        var_type: String,
        /// Index expression
        index: String,
    },
    /// A method parameter, captured on method entry
    Param {
        /// Parameter name
        name: String,
        /// Declared type
        var_type: String,
    },
    /// A synthesized return value with no static declaration
    Virtual {
        /// Display name, `virtual:<method>`
        name: String,
        /// Simple name of the returned type
        var_type: String,
    },
}

impl Variable {
    /// A local variable
    pub fn local(name: impl Into<String>, var_type: impl Into<String>) -> Self {
        Self::Local { name: name.into(), var_type: var_type.into() }
    }

    /// An instance field reached through `name`
    pub fn field(
        name: impl Into<String>,
        var_type: impl Into<String>,
        declaring_type: impl Into<String>,
    ) -> Self {
        Self::Field {
            name: name.into(),
            var_type: var_type.into(),
            declaring_type: declaring_type.into(),
            is_static: false,
        }
    }

    /// A static field
    pub fn static_field(
        name: impl Into<String>,
        var_type: impl Into<String>,
        declaring_type: impl Into<String>,
    ) -> Self {
        Self::Field {
            name: name.into(),
            var_type: var_type.into(),
            declaring_type: declaring_type.into(),
            is_static: true,
        }
    }

    /// An array element `name` whose index is given by `index`
    pub fn array_element(
        name: impl Into<String>,
        var_type: impl Into<String>,
        index: impl Into<String>,
    ) -> Self {
        Self::ArrayElement { name: name.into(), var_type: var_type.into(), index: index.into() }
    }

    /// A method parameter
    pub fn param(name: impl Into<String>, var_type: impl Into<String>) -> Self {
        Self::Param { name: name.into(), var_type: var_type.into() }
    }

    /// A synthesized return-value variable
    pub fn virtual_var(name: impl Into<String>, var_type: impl Into<String>) -> Self {
        Self::Virtual { name: name.into(), var_type: var_type.into() }
    }

    /// Declared name (the access expression for fields and array elements)
    pub fn name(&self) -> &str {
        match self {
            Self::Local { name, .. }
            | Self::Field { name, .. }
            | Self::ArrayElement { name, .. }
            | Self::Param { name, .. }
            | Self::Virtual { name, .. } => name,
        }
    }

    /// Declared type
    pub fn var_type(&self) -> &str {
        match self {
            Self::Local { var_type, .. }
            | Self::Field { var_type, .. }
            | Self::ArrayElement { var_type, .. }
            | Self::Param { var_type, .. }
            | Self::Virtual { var_type, .. } => var_type,
        }
    }

    /// Last segment of the name: the field name for `a.b.count`, the name itself otherwise.
    pub fn simple_name(&self) -> &str {
        match self {
            Self::Field { name, .. } => name.rsplit_once('.').map_or(name, |(_, field)| field),
            _ => self.name(),
        }
    }

    /// Expression to evaluate against a stack frame, `None` for virtual variables.
    pub fn expression(&self) -> Option<&str> {
        match self {
            Self::Virtual { .. } => None,
            _ => Some(self.name()),
        }
    }

    /// Whether this is a synthesized return-value variable
    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual { .. })
    }
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name(), self.var_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_accessors() {
        let field = Variable::field("this.counter.value", "int", "com.example.Counter");
        assert_eq!(field.name(), "this.counter.value");
        assert_eq!(field.simple_name(), "value");
        assert_eq!(field.expression(), Some("this.counter.value"));

        let element = Variable::array_element("values[i]", "int", "i");
        assert_eq!(element.simple_name(), "values[i]");

        let virtual_var = Variable::virtual_var("virtual:compute", "Integer");
        assert!(virtual_var.is_virtual());
        assert_eq!(virtual_var.expression(), None);
        assert_eq!(virtual_var.to_string(), "virtual:compute: Integer");
    }

    #[test]
    fn test_variable_serde_is_tagged() {
        let json = serde_json::to_value(Variable::local("x", "int")).unwrap();
        assert_eq!(json["kind"], "local");
        assert_eq!(json["name"], "x");
    }
}
