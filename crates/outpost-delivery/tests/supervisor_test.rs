//! Integration tests for the worker supervisor.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::{sync::Arc, thread, time::Duration};

use anyhow::Result;
use outpost_core::{Feature, Payload, Response};
use outpost_delivery::{
    DeliveryConfig, FeatureConfig, Scope, WorkerEnv, WorkerState, WorkerSupervisor,
};
use outpost_testing::{
    init_tracing, numbered, wait_for, FailureKind, FakeProcess, GateBackend, RecordingBackend,
    TestClock,
};

const PATIENCE: Duration = Duration::from_secs(5);

fn config() -> DeliveryConfig {
    let mut config = DeliveryConfig::default();
    for feature in Feature::ALL {
        *config.feature_mut(feature) = FeatureConfig::new(100, 10, 60_000);
    }
    config
}

fn supervisor(backend: Arc<RecordingBackend>) -> Result<WorkerSupervisor> {
    Ok(WorkerSupervisor::new(config(), WorkerEnv::new(backend))?)
}

#[test]
fn features_are_delivered_independently() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    let supervisor = supervisor(backend.clone())?;

    for n in 0..5 {
        for feature in Feature::ALL {
            assert!(supervisor.push(numbered(feature, n)));
        }
    }
    supervisor.flush(Scope::All);

    for feature in Feature::ALL {
        assert_eq!(backend.sequence(feature), vec![0, 1, 2, 3, 4], "{feature}");
    }
    assert!(backend.deliveries().iter().all(|delivery| {
        delivery.payloads.iter().all(|payload| payload.feature() == delivery.feature)
    }));
    supervisor.stop(false);
    Ok(())
}

#[test]
fn scoped_flush_only_waits_for_its_feature() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    let supervisor = supervisor(backend.clone())?;

    supervisor.push(numbered(Feature::Metrics, 0));
    supervisor.push(numbered(Feature::Traces, 0));
    supervisor.flush(Scope::Feature(Feature::Metrics));

    assert_eq!(backend.sequence(Feature::Metrics), vec![0]);
    supervisor.flush(Feature::Traces.into());
    assert_eq!(backend.sequence(Feature::Traces), vec![0]);
    supervisor.stop(false);
    Ok(())
}

#[test]
fn graceful_stop_drains_every_worker() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    let supervisor = supervisor(backend.clone())?;

    for n in 0..7 {
        supervisor.push(numbered(Feature::Events, n));
        supervisor.push(numbered(Feature::Errors, n));
    }
    supervisor.stop(false);

    assert_eq!(backend.sequence(Feature::Events).len(), 7);
    assert_eq!(backend.sequence(Feature::Errors).len(), 7);
    assert!(supervisor.stats().iter().all(|stats| stats.state == WorkerState::Stopped));
    assert!(!supervisor.push(numbered(Feature::Events, 7)));
    Ok(())
}

#[test]
fn forced_stop_does_not_wait_for_a_blocked_feature() -> Result<()> {
    init_tracing();
    let gate = Arc::new(GateBackend::new(RecordingBackend::new()));
    let mut config = config();
    config.events = FeatureConfig::new(100, 1, 60_000);
    let supervisor = WorkerSupervisor::new(config, WorkerEnv::new(gate.clone()))?;

    supervisor.push(numbered(Feature::Events, 0));
    anyhow::ensure!(gate.wait_entered(1, PATIENCE), "worker never reached the backend");
    supervisor.push(numbered(Feature::Events, 1));

    supervisor.stop(true);
    let events = supervisor.worker(Feature::Events).stats();
    assert_eq!(events.state, WorkerState::Stopped);
    assert_eq!(events.abandoned_items, 1);

    gate.open();
    Ok(())
}

#[test]
fn ping_disables_features_without_touching_workers() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    let supervisor = supervisor(backend.clone())?;

    supervisor.apply_ping([(Feature::Traces, false), (Feature::Events, true)]);
    assert!(!supervisor.push(numbered(Feature::Traces, 0)));
    assert!(supervisor.push(numbered(Feature::Events, 0)));
    supervisor.flush(Scope::All);

    assert!(backend.sequence(Feature::Traces).is_empty());
    assert_eq!(supervisor.stats().len(), 1);
    supervisor.stop(false);
    Ok(())
}

#[test]
fn escalated_unauthorized_errors_stay_disabled_after_ping() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    backend.fail(FailureKind::Forbidden);
    let config = DeliveryConfig { stop_on_unauthorized: true, ..config() };
    let supervisor = WorkerSupervisor::new(config, WorkerEnv::new(backend.clone()))?;

    for n in 0..10 {
        supervisor.push(numbered(Feature::Errors, n));
    }
    supervisor.flush(Scope::All);
    wait_for("errors to be revoked", PATIENCE, || !supervisor.is_enabled(Feature::Errors))?;

    supervisor.apply_ping([(Feature::Errors, true)]);
    assert!(!supervisor.push(numbered(Feature::Errors, 10)));
    assert!(supervisor.push(numbered(Feature::Metrics, 0)));
    supervisor.stop(false);
    Ok(())
}

#[test]
fn fork_moves_every_worker_to_the_child_pid() -> Result<()> {
    init_tracing();
    let process = Arc::new(FakeProcess::new(4000));
    let backend = Arc::new(RecordingBackend::new());
    let env = WorkerEnv::new(backend.clone()).with_process(process.clone());
    let supervisor = WorkerSupervisor::new(config(), env)?;

    supervisor.push(numbered(Feature::Errors, 0));
    supervisor.push(numbered(Feature::Events, 0));
    supervisor.flush(Scope::All);
    assert_eq!(supervisor.worker_pid(Feature::Errors), Some(4000));

    let child = process.simulate_fork();
    supervisor.fork();
    assert_eq!(supervisor.worker_pid(Feature::Errors), Some(child));
    assert_eq!(supervisor.worker_pid(Feature::Events), Some(child));

    supervisor.push(numbered(Feature::Events, 1));
    supervisor.flush(Scope::All);
    assert_eq!(backend.sequence(Feature::Events), vec![0, 1]);
    supervisor.stop(false);
    Ok(())
}

#[test]
fn start_after_stop_accepts_pushes_again() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    let supervisor = supervisor(backend.clone())?;

    supervisor.push(numbered(Feature::Metrics, 0));
    supervisor.stop(false);
    assert!(!supervisor.push(numbered(Feature::Metrics, 1)));

    supervisor.start();
    assert!(supervisor.push(numbered(Feature::Metrics, 2)));
    supervisor.flush(Scope::All);
    assert_eq!(backend.sequence(Feature::Metrics), vec![0, 2]);
    supervisor.stop(false);
    Ok(())
}

#[test]
fn suspension_window_survives_stop_and_start() -> Result<()> {
    init_tracing();
    let clock = TestClock::new();
    let backend = Arc::new(RecordingBackend::new());
    backend.fail(FailureKind::PaymentRequired);
    let env = WorkerEnv::new(backend.clone()).with_clock(Arc::new(clock.clone()));
    let supervisor = WorkerSupervisor::new(config(), env)?;

    assert!(supervisor.push(numbered(Feature::Events, 0)));
    supervisor.flush(Scope::Feature(Feature::Events));
    wait_for("suspension", PATIENCE, || {
        supervisor.worker(Feature::Events).state() == WorkerState::Suspended
    })?;

    supervisor.stop(false);
    supervisor.start();
    assert_eq!(supervisor.worker(Feature::Events).state(), WorkerState::Suspended);
    assert!(!supervisor.push(numbered(Feature::Events, 1)));
    assert!(supervisor.push(numbered(Feature::Metrics, 0)));

    clock.advance(Duration::from_secs(3601));
    assert!(supervisor.push(numbered(Feature::Events, 2)));
    supervisor.flush(Scope::All);

    assert_eq!(backend.sequence(Feature::Events), vec![0, 2]);
    supervisor.stop(false);
    Ok(())
}

#[test]
fn stop_racing_first_pushes_leaves_no_thread_behind() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());

    for _ in 0..50 {
        let supervisor = supervisor(backend.clone())?;
        let shared = &supervisor;
        thread::scope(|scope| {
            for feature in Feature::ALL {
                scope.spawn(move || shared.push(numbered(feature, 0)));
            }
            scope.spawn(move || shared.stop(true));
        });

        for feature in Feature::ALL {
            assert!(!supervisor.worker(feature).is_alive(), "{feature} worker still running");
        }
    }
    Ok(())
}

#[test]
fn stats_report_delivery_outcomes_per_feature() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    backend.respond(Response::status(429));
    let mut config = config();
    config.metrics = FeatureConfig::new(100, 2, 60_000);
    let supervisor = WorkerSupervisor::new(config, WorkerEnv::new(backend.clone()))?;

    for n in 0..4 {
        supervisor.push(numbered(Feature::Metrics, n));
    }
    supervisor.push(Payload::new(Feature::Events, &b"{}"[..]));
    supervisor.flush(Scope::All);

    let stats = supervisor.stats();
    let metrics = stats.iter().find(|s| s.feature == Feature::Metrics).unwrap();
    assert_eq!(metrics.failed_batches, 1);
    assert_eq!(metrics.delivered_batches, 1);
    assert_eq!(metrics.delivered_items, 2);
    assert_eq!(metrics.throttle_level, 0);

    let events = stats.iter().find(|s| s.feature == Feature::Events).unwrap();
    assert_eq!(events.delivered_items, 1);
    supervisor.stop(false);
    Ok(())
}

#[test]
fn flush_timeout_covers_all_workers() -> Result<()> {
    init_tracing();
    let backend = Arc::new(RecordingBackend::new());
    let supervisor = supervisor(backend)?;

    supervisor.push(numbered(Feature::Errors, 0));
    assert!(supervisor.flush_timeout(Scope::All, PATIENCE));
    supervisor.stop(false);
    Ok(())
}
