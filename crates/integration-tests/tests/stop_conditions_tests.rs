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

//! How a trace run ends: target death, step limit, uncaught exception, event
//! timeout, cancellation and exhausted source. Also which steps are recorded at all:
//! the recording trigger and the traced thread.

use std::time::Duration;

use etrace_common::types::{BreakPoint, MethodSignature, Variable};
use etrace_engine::{
    DebugEvent, EngineConfig, EngineError, IndexedResolver, Location, MethodInfo,
    RecordingTrigger, RuntimeValue, StopReason, ThreadId, TraceEngine,
};
use etrace_integration_tests::test_utils::{
    engine::run_script,
    init,
    program::ProgramScript,
    session::{ScriptedSession, TargetProgram},
};
use tracing::info;

const CALC: &str = "com.example.Calc";
const CALC_TEST: &str = "com.example.CalcTest";

fn run_method() -> MethodInfo {
    MethodInfo::new(MethodSignature::new(CALC, "run", "()V"), 2)
}

fn resolver() -> IndexedResolver {
    IndexedResolver::new()
        .with_method(CALC, "run", 2, 9)
        .with_local_scope(CALC, "a", 3, 9)
        .with_local_scope(CALC, "b", 4, 9)
}

fn points() -> Vec<BreakPoint> {
    vec![
        BreakPoint::new(CALC, 3).with_written(Variable::local("a", "int")),
        BreakPoint::new(CALC, 4).with_written(Variable::local("b", "int")),
        BreakPoint::new(CALC, 5).with_read(Variable::local("b", "int")),
    ]
}

fn straight_line() -> ProgramScript {
    ProgramScript::new()
        .with_lines(CALC, [3, 4, 5])
        .start(&[CALC])
        .call(run_method(), 3, &[])
        .step(3)
        .set("a", RuntimeValue::primitive("int", 1))
        .step(4)
        .set("b", RuntimeValue::primitive("int", 2))
        .step(5)
}

#[tokio::test]
async fn test_step_limit_stops_and_terminates() {
    init::init_test_environment();
    info!("Testing the step limit");

    let config = EngineConfig::default().with_step_limit(2);
    let run = run_script(config, straight_line().death(), resolver(), points()).await.unwrap();

    assert_eq!(run.outcome.stop_reason, StopReason::StepLimit);
    assert_eq!(run.outcome.trace.len(), 2);
    assert!(run.log.terminated);
}

#[tokio::test]
async fn test_uncaught_exception_stops() {
    init::init_test_environment();
    info!("Testing an uncaught exception");

    let script = ProgramScript::new()
        .with_lines(CALC, [3, 4, 5])
        .start(&[CALC])
        .call(run_method(), 3, &[])
        .step(3)
        .throw(None)
        .step(4);
    let run = run_script(EngineConfig::default(), script, resolver(), points()).await.unwrap();

    assert_eq!(run.outcome.stop_reason, StopReason::UncaughtException);
    assert_eq!(run.outcome.trace.len(), 1);
    assert!(run.outcome.trace.node(1).unwrap().exception);
    assert!(run.log.terminated);
}

#[tokio::test]
async fn test_uncaught_exception_before_first_node_is_ignored() {
    init::init_test_environment();
    info!("Testing an uncaught exception reported before anything was recorded");

    let init_method = MethodInfo::new(MethodSignature::new(CALC, "init", "()V"), 1);
    let script = ProgramScript::new()
        .with_lines(CALC, [1, 3, 4, 5])
        .start(&[CALC])
        .call(init_method, 1, &[])
        .throw(None)
        .ret(RuntimeValue::Void)
        .call(run_method(), 3, &[])
        .step(3)
        .set("a", RuntimeValue::primitive("int", 1))
        .step(4)
        .set("b", RuntimeValue::primitive("int", 2))
        .step(5)
        .death();
    let run = run_script(EngineConfig::default(), script, resolver(), points()).await.unwrap();

    assert_eq!(run.outcome.stop_reason, StopReason::VmDeath);
    assert_eq!(run.outcome.trace.len(), 3);
    assert!(run.outcome.trace.iter().all(|node| !node.exception));
    assert!(!run.log.terminated);
}

#[tokio::test]
async fn test_exhausted_source_closes_session() {
    init::init_test_environment();
    info!("Testing a source that ends without target death");

    let run = run_script(EngineConfig::default(), straight_line(), resolver(), points()).await.unwrap();

    assert_eq!(run.outcome.stop_reason, StopReason::SessionClosed);
    assert_eq!(run.outcome.trace.len(), 3);
    assert!(!run.log.terminated);
    assert_eq!(run.log.resumes, run.log.batches_delivered);
}

#[tokio::test]
async fn test_event_timeout_terminates_target() {
    init::init_test_environment();
    info!("Testing the bounded wait for events");

    let (handle, session) = ScriptedSession::streaming(TargetProgram::default(), 4);
    let log = session.log();
    let config = EngineConfig::default().with_event_timeout(Duration::from_millis(50));

    let result = TraceEngine::new(config, session, resolver(), points()).run().await;

    match result {
        Err(EngineError::Timeout { waited }) => assert_eq!(waited, Duration::from_millis(50)),
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert!(log.lock().terminated);
    drop(handle);
}

#[tokio::test]
async fn test_cancel_before_run() {
    init::init_test_environment();
    info!("Testing cancellation before the first batch");

    let session = straight_line().death().into_session();
    let log = session.log();
    let engine = TraceEngine::new(EngineConfig::default(), session, resolver(), points());
    engine.cancel_handle().cancel();

    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert!(outcome.trace.is_empty());
    let log = log.lock();
    assert_eq!(log.batches_delivered, 0);
    assert!(log.terminated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_running() {
    init::init_test_environment();
    info!("Testing cancellation from another task");

    let (program, batches) = straight_line().death().into_parts();
    let (handle, session) = ScriptedSession::streaming(program, batches.len());
    let log = session.log();
    let engine = TraceEngine::new(EngineConfig::default(), session, resolver(), points());
    let cancel = engine.cancel_handle();
    let running = tokio::spawn(engine.run());

    let mut batches = batches.into_iter();
    // start, method entry, first step
    for batch in batches.by_ref().take(3) {
        handle.send(batch).await.unwrap();
    }
    while log.lock().resumes < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    cancel.cancel();
    for batch in batches {
        // The engine may already have stopped and dropped the session.
        if handle.send(batch).await.is_err() {
            break;
        }
    }

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert!(matches!(outcome.trace.len(), 1 | 2), "recorded {} nodes", outcome.trace.len());
    assert!(log.lock().terminated);
}

#[tokio::test]
async fn test_recording_trigger_gates_steps() {
    init::init_test_environment();
    info!("Testing test-case mode");

    let set_up = MethodInfo::new(MethodSignature::new(CALC_TEST, "setUp", "()V"), 5);
    let test_add = MethodInfo::new(MethodSignature::new(CALC_TEST, "testAdd", "()V"), 9);
    let script = ProgramScript::new()
        .with_lines(CALC, [3, 4, 5])
        .start(&[CALC, CALC_TEST])
        .call(set_up, 6, &[])
        .call(run_method(), 3, &[])
        // Interesting, but recording has not started.
        .step(3)
        .ret(RuntimeValue::Void)
        .ret(RuntimeValue::Void)
        .call(test_add, 10, &[])
        .step(10)
        .call(run_method(), 3, &[])
        .step(3)
        .set("a", RuntimeValue::primitive("int", 1))
        .step(4)
        .death();

    let config = EngineConfig::default()
        .with_recording_trigger(RecordingTrigger::new(CALC_TEST, "testAdd"));
    let run = run_script(config, script, resolver(), points()).await.unwrap();
    let trace = &run.outcome.trace;

    assert_eq!(trace.len(), 2);
    assert_eq!(trace.node(1).unwrap().line(), 3);
    assert!(trace.node(1).unwrap().writes("com.example.Calc$a$3$9:1"));
    assert_eq!(run.log.step_watches, vec![(ThreadId(1), false), (ThreadId(1), true)]);
}

#[tokio::test]
async fn test_other_threads_are_not_traced() {
    init::init_test_environment();
    info!("Testing that only the starting thread is stepped and recorded");

    let worker = ThreadId(2);
    let at_line_4 = Location::new(MethodSignature::new(CALC, "run", "()V"), 4, 0);
    let script = ProgramScript::new()
        .with_lines(CALC, [3, 4, 5])
        .start(&[CALC])
        .raw(vec![DebugEvent::ThreadStart { thread: worker }])
        .call(run_method(), 3, &[])
        .step(3)
        .set("a", RuntimeValue::primitive("int", 1))
        .raw(vec![
            DebugEvent::MethodEntry {
                thread: worker,
                location: at_line_4.clone(),
                method: run_method(),
            },
            DebugEvent::Step { thread: worker, location: at_line_4.clone() },
            DebugEvent::MethodExit {
                thread: worker,
                location: at_line_4,
                method: run_method(),
                return_value: RuntimeValue::Void,
            },
        ])
        .step(4)
        .set("b", RuntimeValue::primitive("int", 2))
        .step(5)
        .death();
    let run = run_script(EngineConfig::default(), script, resolver(), points()).await.unwrap();
    let trace = &run.outcome.trace;

    assert_eq!(run.outcome.stop_reason, StopReason::VmDeath);
    let lines: Vec<_> = trace.iter().map(|node| node.line()).collect();
    assert_eq!(lines, vec![3, 4, 5]);
    assert!(trace.node(1).unwrap().writes("com.example.Calc$a$3$9:1"));
    assert!(trace.node(2).unwrap().writes("com.example.Calc$b$4$9:2"));
    assert!(trace.iter().all(|node| node.invocation_parent.is_none()));
    assert_eq!(run.log.step_watches, vec![(ThreadId(1), true)]);
}
