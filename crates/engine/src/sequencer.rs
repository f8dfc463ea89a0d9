//! Event sequencer
//!
//! Events inside a batch arrive in no guaranteed order. Step events are processed
//! first so a step's read capture happens before any call it makes is entered.

use crate::DebugEvent;

/// Ordering score: lower is processed first.
fn score(event: &DebugEvent) -> i8 {
    match event {
        DebugEvent::Step { .. } => -1,
        DebugEvent::MethodEntry { .. } | DebugEvent::MethodExit { .. } => 1,
        _ => 0,
    }
}

/// Sort a batch: steps first, method entries and exits last, otherwise stable.
pub fn sort_events(mut events: Vec<DebugEvent>) -> Vec<DebugEvent> {
    events.sort_by_key(score);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Location, MethodInfo, ThreadId};
    use etrace_common::types::MethodSignature;

    fn location(line: i64) -> Location {
        Location::new(MethodSignature::new("Calc", "run", "()V"), line, 0)
    }

    #[test]
    fn test_steps_first_entries_last_stable_otherwise() {
        let method = MethodInfo::new(MethodSignature::new("Calc", "run", "()V"), 1);
        let thread = ThreadId(1);
        let batch = vec![
            DebugEvent::MethodEntry { thread, location: location(1), method },
            DebugEvent::ClassPrepare { class_name: "A".into() },
            DebugEvent::Step { thread, location: location(2) },
            DebugEvent::ClassPrepare { class_name: "B".into() },
            DebugEvent::Step { thread, location: location(3) },
        ];

        let sorted = sort_events(batch);
        let lines: Vec<String> = sorted
            .iter()
            .map(|event| match event {
                DebugEvent::Step { location, .. } => format!("step {}", location.line),
                DebugEvent::ClassPrepare { class_name } => format!("prepare {class_name}"),
                DebugEvent::MethodEntry { .. } => "entry".to_string(),
                _ => unreachable!(),
            })
            .collect();

        assert_eq!(lines, vec!["step 2", "step 3", "prepare A", "prepare B", "entry"]);
    }
}
