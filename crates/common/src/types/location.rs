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

/// Name of the static initializer method.
pub const STATIC_INITIALIZER: &str = "<clinit>";

/// Fully qualified signature of a method, rendered as `class#name(descriptor)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{class_name}#{method_name}{descriptor}")]
pub struct MethodSignature {
    /// Declaring class, e.g. `com.example.Foo$Inner`
    pub class_name: String,
    /// Simple method name
    pub method_name: String,
    /// Parameter/return descriptor, e.g. `(I)I`
    pub descriptor: String,
}

impl MethodSignature {
    /// Create a new method signature
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Method name and descriptor without the declaring class, e.g. `foo(I)I`.
    pub fn method_sign(&self) -> String {
        format!("{}{}", self.method_name, self.descriptor)
    }

    /// Whether this is a class static initializer.
    pub fn is_static_initializer(&self) -> bool {
        self.method_name == STATIC_INITIALIZER
    }
}

/// The compilation unit that declares `class_name`: nested classes (`Outer$Inner`)
/// belong to their outermost class.
pub fn declaring_unit_of(class_name: &str) -> &str {
    class_name.split_once('$').map_or(class_name, |(outer, _)| outer)
}

/// Unqualified name of a dotted path, e.g. `Foo` for `com.example.Foo`.
pub fn simple_name(qualified: &str) -> &str {
    qualified.rsplit_once('.').map_or(qualified, |(_, simple)| simple)
}
