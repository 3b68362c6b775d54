//! End-to-end tests for the agent.
//!
//! Exercises configuration, backend selection, JSON helpers, and the
//! lifecycle from first push through stop, restart and fork.

#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use outpost::{Agent, Config};
use outpost_core::{Feature, Response};
use outpost_delivery::{WorkerEnv, WorkerState};
use outpost_testing::{init_tracing, numbered, FakeProcess, RecordingBackend};
use serde::Serialize;
use serde_json::{json, Value};

fn config() -> Config {
    Config { events_batch_max_count: 10, idle_tick_ms: 50, ..Config::default() }
}

fn bodies(backend: &RecordingBackend, feature: Feature) -> Vec<Value> {
    backend
        .payloads(feature)
        .iter()
        .map(|payload| serde_json::from_slice(payload.body()).unwrap())
        .collect()
}

#[test]
fn notices_and_events_are_delivered_as_json() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    let agent = Agent::new(&config(), backend.clone())?;

    assert!(agent.notify(&json!({ "error": { "class": "RuntimeError", "message": "boom" } })));
    assert!(agent.event(&json!({ "event_type": "user.signup" })));
    assert!(agent.event(&json!({ "event_type": "user.login" })));
    agent.flush();

    let notices = bodies(&backend, Feature::Errors);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0]["error"]["class"], "RuntimeError");

    let events = bodies(&backend, Feature::Events);
    let types: Vec<_> = events.iter().map(|event| event["event_type"].clone()).collect();
    assert_eq!(types, vec![json!("user.signup"), json!("user.login")]);
    Ok(())
}

#[test]
fn unserializable_payloads_are_refused() -> Result<()> {
    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(
            &self,
            _serializer: S,
        ) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not today"))
        }
    }

    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    let agent = Agent::new(&config(), backend.clone())?;

    assert!(!agent.event(&Unserializable));
    agent.flush();
    assert_eq!(backend.delivery_count(), 0);
    Ok(())
}

#[test]
fn disabled_reporting_never_reaches_the_backend() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    let config = Config { report_data: false, ..config() };
    let agent = Agent::new(&config, backend.clone())?;

    for n in 0..3 {
        assert!(agent.push(numbered(Feature::Events, n)));
    }
    agent.flush();

    assert_eq!(backend.delivery_count(), 0);
    let events = agent.stats().into_iter().find(|s| s.feature == Feature::Events).unwrap();
    assert_eq!(events.delivered_items, 3);
    assert_eq!(events.throttle_level, 0);
    Ok(())
}

#[test]
fn debug_mode_still_delivers() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    let config = Config { debug: true, ..config() };
    let agent = Agent::new(&config, backend.clone())?;

    agent.push(numbered(Feature::Metrics, 1));
    agent.flush_feature(Feature::Metrics);
    assert_eq!(backend.sequence(Feature::Metrics), vec![1]);
    Ok(())
}

#[test]
fn dropping_the_agent_drains_pending_payloads() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    {
        let agent = Agent::new(&config(), backend.clone())?;
        for n in 0..25 {
            agent.push(numbered(Feature::Events, n));
        }
    }

    assert_eq!(backend.sequence(Feature::Events), (0..25).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn stop_is_idempotent_and_start_resumes() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    let agent = Agent::new(&config(), backend.clone())?;

    agent.push(numbered(Feature::Events, 0));
    agent.stop(false);
    agent.stop(true);
    assert!(!agent.push(numbered(Feature::Events, 1)));
    assert!(agent.stats().iter().all(|s| s.state == WorkerState::Stopped));

    agent.start();
    assert!(agent.push(numbered(Feature::Events, 2)));
    assert!(agent.flush_timeout(Duration::from_secs(5)));
    assert_eq!(backend.sequence(Feature::Events), vec![0, 2]);
    Ok(())
}

#[test]
fn locally_disabled_features_are_refused() -> Result<()> {
    init_tracing();
    let config = Config { traces_enabled: false, ..config() };
    let agent = Agent::new(&config, Arc::new(RecordingBackend::new()))?;

    assert!(!agent.push(numbered(Feature::Traces, 0)));
    assert!(agent.push(numbered(Feature::Metrics, 0)));
    Ok(())
}

#[test]
fn server_ping_controls_features() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    let agent = Agent::new(&config(), backend.clone())?;

    agent.apply_ping([(Feature::Events, false)]);
    assert!(!agent.event(&json!({ "event_type": "ignored" })));

    agent.apply_ping([(Feature::Events, true)]);
    assert!(agent.event(&json!({ "event_type": "kept" })));
    agent.flush();
    assert_eq!(bodies(&backend, Feature::Events).len(), 1);
    Ok(())
}

#[test]
fn fork_hands_delivery_to_the_child() -> Result<()> {
    init_tracing();
    let process = Arc::new(FakeProcess::new(77));
    let backend = Arc::new(RecordingBackend::new());
    let env = WorkerEnv::new(backend.clone()).with_process(process.clone());
    let agent = Agent::with_env(&config(), env)?;

    agent.push(numbered(Feature::Events, 0));
    agent.flush();
    assert_eq!(agent.supervisor().worker_pid(Feature::Events), Some(77));

    let child = process.simulate_fork();
    agent.fork();
    agent.push(numbered(Feature::Events, 1));
    agent.flush();

    assert_eq!(agent.supervisor().worker_pid(Feature::Events), Some(child));
    assert_eq!(backend.sequence(Feature::Events), vec![0, 1]);
    Ok(())
}

#[test]
fn stubbed_responses_leave_throttle_untouched() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::with_fallback(Response::stubbed()));
    let agent = Agent::new(&config(), backend.clone())?;

    agent.push(numbered(Feature::Errors, 0));
    agent.flush();

    let errors = agent.stats().into_iter().find(|s| s.feature == Feature::Errors).unwrap();
    assert_eq!(errors.delivered_batches, 1);
    assert_eq!(errors.throttle_level, 0);
    assert_eq!(backend.deliveries()[0].feature, Feature::Errors);
    Ok(())
}
