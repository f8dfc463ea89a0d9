use std::{env, time::Duration};

use etrace_common::{ETRACE_EVENT_TIMEOUT_MS, ETRACE_STEP_LIMIT, ETRACE_VARIABLE_LAYER};
use etrace_engine::{
    EngineConfig, RecordingTrigger, DEFAULT_EVENT_TIMEOUT, DEFAULT_LOCATION_CACHE_CAPACITY,
    DEFAULT_STEP_LIMIT, DEFAULT_VARIABLE_LAYER,
};
use serial_test::serial;
use tracing::info;

fn clear_env() {
    env::remove_var(ETRACE_EVENT_TIMEOUT_MS);
    env::remove_var(ETRACE_STEP_LIMIT);
    env::remove_var(ETRACE_VARIABLE_LAYER);
}

#[test]
fn test_default_config() {
    etrace_common::logging::ensure_test_logging(None);
    info!("Running test");
    let config = EngineConfig::default();

    assert_eq!(config.event_timeout, DEFAULT_EVENT_TIMEOUT);
    assert_eq!(config.step_limit, DEFAULT_STEP_LIMIT);
    assert_eq!(config.variable_layer, DEFAULT_VARIABLE_LAYER);
    assert_eq!(config.location_cache_capacity, DEFAULT_LOCATION_CACHE_CAPACITY);
    assert!(config.library_includes.is_empty());
    assert!(config.recording_trigger.is_none());
}

#[test]
fn test_config_with_custom_values() {
    etrace_common::logging::ensure_test_logging(None);
    info!("Running test");
    let config = EngineConfig::default()
        .with_event_timeout(Duration::from_millis(250))
        .with_step_limit(10)
        .with_variable_layer(3)
        .with_location_cache_capacity(8)
        .with_library_include("java.util.")
        .with_recording_trigger(RecordingTrigger::new("com.example.CalcTest", "testAdd"));

    assert_eq!(config.event_timeout, Duration::from_millis(250));
    assert_eq!(config.step_limit, 10);
    assert_eq!(config.variable_layer, 3);
    assert_eq!(config.location_cache_capacity, 8);
    assert!(config.is_included_library("java.util.ArrayList"));
    assert!(!config.is_included_library("java.lang.String"));

    let trigger = config.recording_trigger.as_ref().unwrap();
    assert!(trigger.matches("com.example.CalcTest", "testAdd"));
    assert!(!trigger.matches("com.example.CalcTest", "setUp"));
}

#[test]
fn test_config_clone() {
    etrace_common::logging::ensure_test_logging(None);
    info!("Running test");
    let config = EngineConfig::default().with_step_limit(42).with_library_include("org.apache.");

    let cloned = config.clone();

    assert_eq!(config, cloned);
    assert_eq!(cloned.library_includes, vec!["org.apache.".to_string()]);
}

#[test]
fn test_config_serde_round_trip() {
    let config = EngineConfig::default().with_variable_layer(2);
    let json = serde_json::to_string(&config).unwrap();
    let back: EngineConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(config, back);
}

#[test]
#[serial]
fn test_config_from_env_overrides() {
    etrace_common::logging::ensure_test_logging(None);
    clear_env();
    env::set_var(ETRACE_EVENT_TIMEOUT_MS, "1500");
    env::set_var(ETRACE_STEP_LIMIT, "77");
    env::set_var(ETRACE_VARIABLE_LAYER, "2");

    let config = EngineConfig::from_env();
    clear_env();

    assert_eq!(config.event_timeout, Duration::from_millis(1500));
    assert_eq!(config.step_limit, 77);
    assert_eq!(config.variable_layer, 2);
}

#[test]
#[serial]
fn test_config_from_env_ignores_invalid_values() {
    etrace_common::logging::ensure_test_logging(None);
    clear_env();
    env::set_var(ETRACE_STEP_LIMIT, "lots");
    env::set_var(ETRACE_VARIABLE_LAYER, " 4 ");

    let config = EngineConfig::from_env();
    clear_env();

    assert_eq!(config.step_limit, DEFAULT_STEP_LIMIT);
    assert_eq!(config.variable_layer, 4);
    assert_eq!(config.event_timeout, DEFAULT_EVENT_TIMEOUT);
}
