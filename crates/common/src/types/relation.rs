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

use std::collections::BTreeSet;

use delegate::delegate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::Variable;

/// Producers and consumers of one variable identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepVariableRelationEntry {
    /// The identity this entry is keyed by
    pub var_id: String,
    /// Distinct spellings that resolved to this identity
    pub aliases: Vec<Variable>,
    /// Orders of nodes that wrote the identity
    pub producers: BTreeSet<usize>,
    /// Orders of nodes that read the identity
    pub consumers: BTreeSet<usize>,
}

impl StepVariableRelationEntry {
    /// Create an empty entry
    pub fn new(var_id: impl Into<String>) -> Self {
        Self { var_id: var_id.into(), ..Default::default() }
    }

    /// Record a spelling, ignoring duplicates
    pub fn add_alias(&mut self, var: &Variable) {
        if !self.aliases.contains(var) {
            self.aliases.push(var.clone());
        }
    }

    /// Record a producer node
    pub fn add_producer(&mut self, order: usize) {
        self.producers.insert(order);
    }

    /// Record a consumer node
    pub fn add_consumer(&mut self, order: usize) {
        self.consumers.insert(order);
    }
}

/// Maps variable identity to its [`StepVariableRelationEntry`], in first-seen order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataRelationTable {
    inner: IndexMap<String, StepVariableRelationEntry>,
}

impl DataRelationTable {
    delegate! {
        to self.inner {
            /// Look up the entry for an identity
            pub fn get(&self, var_id: &str) -> Option<&StepVariableRelationEntry>;
            /// Number of identities
            pub fn len(&self) -> usize;
            /// Whether the table is empty
            pub fn is_empty(&self) -> bool;
            /// Iterate entries in first-seen order
            pub fn values(&self) -> indexmap::map::Values<'_, String, StepVariableRelationEntry>;
        }
    }

    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry for `var_id`, created on first use
    pub fn entry_mut(&mut self, var_id: &str) -> &mut StepVariableRelationEntry {
        self.inner
            .entry(var_id.to_string())
            .or_insert_with(|| StepVariableRelationEntry::new(var_id))
    }

    /// Record that node `order` wrote `var` under identity `var_id`
    pub fn add_producer(&mut self, var_id: &str, var: &Variable, order: usize) {
        let entry = self.entry_mut(var_id);
        entry.add_alias(var);
        entry.add_producer(order);
    }

    /// Record that node `order` read `var` under identity `var_id`
    pub fn add_consumer(&mut self, var_id: &str, var: &Variable, order: usize) {
        let entry = self.entry_mut(var_id);
        entry.add_alias(var);
        entry.add_consumer(order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_accumulate() {
        let mut table = DataRelationTable::new();
        let x = Variable::local("x", "int");

        table.add_producer("Calc$x$3$9:2", &x, 2);
        table.add_consumer("Calc$x$3$9:2", &x, 3);
        table.add_consumer("Calc$x$3$9:2", &x, 3);
        table.add_consumer("Calc$y$3$9:0", &Variable::local("y", "int"), 3);

        assert_eq!(table.len(), 2);
        let entry = table.get("Calc$x$3$9:2").unwrap();
        assert_eq!(entry.aliases, vec![x]);
        assert_eq!(entry.producers.iter().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(entry.consumers.iter().copied().collect::<Vec<_>>(), vec![3]);

        let ids: Vec<_> = table.values().map(|e| e.var_id.as_str()).collect();
        assert_eq!(ids, vec!["Calc$x$3$9:2", "Calc$y$3$9:0"]);
    }
}
