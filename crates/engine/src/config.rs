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

//! Engine configuration.
//!
//! [`EngineConfig`] is built from defaults, optionally overlaid with environment
//! variables ([`EngineConfig::from_env`]) and then adjusted with the `with_*` builders.

use std::{env, time::Duration};

use etrace_common::{ETRACE_EVENT_TIMEOUT_MS, ETRACE_STEP_LIMIT, ETRACE_VARIABLE_LAYER};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default bounded wait for the next event batch.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default ceiling on recorded trace nodes.
pub const DEFAULT_STEP_LIMIT: usize = 100_000;
/// Default expansion depth of reference snapshots.
pub const DEFAULT_VARIABLE_LAYER: usize = 1;
/// Default capacity of the library line-variable cache.
pub const DEFAULT_LOCATION_CACHE_CAPACITY: usize = 1024;

/// Method whose entry starts recording in test-case mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingTrigger {
    /// Declaring class of the trigger method
    pub class_name: String,
    /// Name of the trigger method
    pub method_name: String,
}

impl RecordingTrigger {
    /// Create a trigger on `class_name.method_name`
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self { class_name: class_name.into(), method_name: method_name.into() }
    }

    /// Whether entering `class_name.method_name` fires this trigger
    pub fn matches(&self, class_name: &str, method_name: &str) -> bool {
        self.class_name == class_name && self.method_name == method_name
    }
}

/// Configuration for the trace-construction engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long to wait for the next event batch before the run is aborted
    pub event_timeout: Duration,
    /// Maximum number of trace nodes recorded before the run stops
    pub step_limit: usize,
    /// Levels of object fields and array elements expanded in value snapshots
    pub variable_layer: usize,
    /// Capacity of the library line-variable cache
    pub location_cache_capacity: usize,
    /// Class-name prefixes of third-party libraries whose data flow is still tracked
    pub library_includes: Vec<String>,
    /// Test-case mode: only start recording once this method is entered
    pub recording_trigger: Option<RecordingTrigger>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            step_limit: DEFAULT_STEP_LIMIT,
            variable_layer: DEFAULT_VARIABLE_LAYER,
            location_cache_capacity: DEFAULT_LOCATION_CACHE_CAPACITY,
            library_includes: Vec::new(),
            recording_trigger: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with the `ETRACE_*` environment variables that are set and valid
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = parse_env::<u64>(ETRACE_EVENT_TIMEOUT_MS) {
            config.event_timeout = Duration::from_millis(ms);
        }
        if let Some(limit) = parse_env(ETRACE_STEP_LIMIT) {
            config.step_limit = limit;
        }
        if let Some(layer) = parse_env(ETRACE_VARIABLE_LAYER) {
            config.variable_layer = layer;
        }
        config
    }

    /// Set the event wait timeout
    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }

    /// Set the maximum number of trace nodes
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Set the snapshot expansion depth
    pub fn with_variable_layer(mut self, layer: usize) -> Self {
        self.variable_layer = layer;
        self
    }

    /// Set the library line-variable cache capacity
    pub fn with_location_cache_capacity(mut self, capacity: usize) -> Self {
        self.location_cache_capacity = capacity;
        self
    }

    /// Track data flow through classes starting with `prefix`
    pub fn with_library_include(mut self, prefix: impl Into<String>) -> Self {
        self.library_includes.push(prefix.into());
        self
    }

    /// Only start recording once `trigger` is entered
    pub fn with_recording_trigger(mut self, trigger: RecordingTrigger) -> Self {
        self.recording_trigger = Some(trigger);
        self
    }

    /// Whether `class_name` belongs to an included third-party library
    pub fn is_included_library(&self, class_name: &str) -> bool {
        self.library_includes.iter().any(|prefix| class_name.starts_with(prefix.as_str()))
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring invalid environment override");
            None
        }
    }
}
