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

//! Capture inside included library classes.
//!
//! Library code is never part of the execution order and never gets trace nodes.
//! When stepping through an included library, the variables each line touches are
//! attributed to the latest trace node: reads make it a consumer, writes a producer.
//! The value a library line returns becomes the latest returned value.

use etrace_common::types::{Access, BreakPoint, Trace};
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::{
    DebugSession, LineVariables, Location, RuntimeValue, StaticResolver, StepCapture, ThreadId,
};

/// Key of a cached library location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationKey {
    /// Declaring class
    pub class_name: String,
    /// Source line
    pub line: usize,
    /// Bytecode offset
    pub code_index: u64,
}

impl LocationKey {
    /// Key of `location`, `None` when it has no line information
    pub fn of(location: &Location) -> Option<Self> {
        Some(Self {
            class_name: location.class_name.clone(),
            line: location.line_number()?,
            code_index: location.code_index,
        })
    }
}

/// Bounded cache of static line variables, evicting the oldest insertion first.
///
/// Only the static analysis result is cached; values are evaluated fresh on every visit.
#[derive(Debug, Clone)]
pub struct LocationCache {
    capacity: usize,
    inner: IndexMap<LocationKey, LineVariables>,
}

impl LocationCache {
    /// Create a cache holding at most `capacity` locations
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), inner: IndexMap::new() }
    }

    /// Maximum number of cached locations
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached locations
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Whether `key` is cached
    pub fn contains(&self, key: &LocationKey) -> bool {
        self.inner.contains_key(key)
    }

    /// Cached variables of `key`, computing them with `analyze` on a miss.
    ///
    /// Misses for which `analyze` yields nothing are not cached.
    pub fn get_or_analyze<F>(&mut self, key: LocationKey, analyze: F) -> Option<&LineVariables>
    where
        F: FnOnce() -> Option<LineVariables>,
    {
        if !self.inner.contains_key(&key) {
            let vars = analyze()?;
            if self.inner.len() >= self.capacity {
                if let Some((evicted, _)) = self.inner.shift_remove_index(0) {
                    trace!(class = %evicted.class_name, line = evicted.line, "evicted library location");
                }
            }
            self.inner.insert(key.clone(), vars);
        }
        self.inner.get(&key)
    }

    /// Drop every cached location
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

/// Attributes variable accesses in included library code to the latest trace node.
#[derive(Debug, Clone)]
pub struct LibraryCapture {
    cache: LocationCache,
}

impl LibraryCapture {
    /// Create a library capture with a location cache of `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self { cache: LocationCache::new(capacity) }
    }

    /// The static location cache
    pub fn cache(&self) -> &LocationCache {
        &self.cache
    }

    /// Capture the library step at `location`.
    ///
    /// Returns the value the line returns, when it is a return statement that could be
    /// evaluated.
    pub fn capture<S, R>(
        &mut self,
        capture: &StepCapture<'_, S, R>,
        resolver: &R,
        trace: &mut Trace,
        thread: ThreadId,
        location: &Location,
    ) -> Option<RuntimeValue>
    where
        S: DebugSession,
        R: StaticResolver,
    {
        let latest = trace.latest_order()?;
        let key = LocationKey::of(location)?;
        let vars = self
            .cache
            .get_or_analyze(key.clone(), || {
                resolver.line_variables(&key.class_name, key.line, key.code_index)
            })?
            .clone();

        let frame = match capture.find_frame(thread, location) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%location, %err, "no frame for library step");
                return None;
            }
        };
        let point = BreakPoint::new(location.class_name.clone(), key.line);

        for (var, access) in vars
            .read
            .iter()
            .map(|v| (v, Access::Read))
            .chain(vars.written.iter().map(|v| (v, Access::Written)))
        {
            match capture.evaluate_variable(trace, latest, &point, thread, frame.id, var, access) {
                Ok(value) => {
                    let relations = trace.relations_mut();
                    match access {
                        Access::Read => relations.add_consumer(&value.var_id, var, latest),
                        Access::Written => relations.add_producer(&value.var_id, var, latest),
                    }
                }
                Err(err) => trace!(%location, var = var.name(), %err, "dropped library variable"),
            }
        }

        let returned = vars.returned.as_ref()?;
        let expression = returned.expression()?;
        match capture.session().evaluate(thread, frame.id, expression) {
            Ok(evaluation) => Some(evaluation.value),
            Err(err) => {
                trace!(%location, %err, "cannot evaluate library return value");
                None
            }
        }
    }

    /// Drop cached analysis results
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etrace_common::types::{MethodSignature, Variable};

    fn key(line: usize) -> LocationKey {
        LocationKey { class_name: "java.util.ArrayList".into(), line, code_index: 0 }
    }

    fn vars(name: &str) -> LineVariables {
        LineVariables { read: vec![Variable::local(name, "int")], ..Default::default() }
    }

    #[test]
    fn test_cache_evicts_oldest_first() {
        let mut cache = LocationCache::new(2);
        cache.get_or_analyze(key(1), || Some(vars("a")));
        cache.get_or_analyze(key(2), || Some(vars("b")));
        // Hit: the analysis must not run again.
        let hit = cache.get_or_analyze(key(1), || panic!("analyzed a cached location")).cloned();
        assert_eq!(hit, Some(vars("a")));

        cache.get_or_analyze(key(3), || Some(vars("c")));
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn test_failed_analysis_is_not_cached() {
        let mut cache = LocationCache::new(4);
        assert!(cache.get_or_analyze(key(1), || None).is_none());
        assert!(cache.is_empty());
        assert_eq!(LocationCache::new(0).capacity(), 1);
    }

    #[test]
    fn test_location_key_requires_line() {
        let sig = MethodSignature::new("java.util.ArrayList", "add", "(Ljava/lang/Object;)Z");
        assert_eq!(LocationKey::of(&Location::new(sig.clone(), 40, 2)).map(|k| k.line), Some(40));
        assert!(LocationKey::of(&Location::new(sig, -1, 2)).is_none());
    }
}
