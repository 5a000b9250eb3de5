//! Chaos conductor end-to-end scenarios: CEP-001 latency injection, the
//! validation gauntlet and its repeatability.

use std::time::Duration;

use telos_core::{ExperimentOutcome, ExperimentOverrides};
use telos_e2e_tests::harness::TestCore;

#[tokio::test]
async fn cep_001_latency_injection_passes() {
    let h = TestCore::serving();
    let conductor = h.core.conductor();

    let history_before = conductor.experiment_history(100).len();

    // Inject 200ms of L2 latency; L1 absorbs the hot path, so the hybrid
    // query p99 never leaves the steady-state envelope
    let record = conductor
        .start_experiment(
            "CEP-001",
            ExperimentOverrides {
                duration: Some(Duration::from_millis(300)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(record.outcome, ExperimentOutcome::Passed);
    assert!(record.breach.is_none());
    assert!(record.baseline.is_some());
    assert_eq!(
        conductor.experiment_history(100).len(),
        history_before + 1
    );

    h.core.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_experiment_is_rejected() {
    let h = TestCore::open();
    let err = h
        .core
        .conductor()
        .start_experiment("CEP-404", ExperimentOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        telos_core::ChaosError::UnknownExperiment(_)
    ));
}

#[tokio::test]
async fn gauntlet_runs_every_experiment_once() {
    let h = TestCore::serving();
    h.shorten_experiments(Duration::from_millis(60));

    let report = h.core.conductor().run_validation_gauntlet().await.unwrap();

    assert_eq!(report.total, 5);
    assert_eq!(report.passed, 5, "report: {:?}", report.results);
    assert!((report.success_rate - 1.0).abs() < f64::EPSILON);

    // Exactly one history record per experiment
    let history = h.core.conductor().experiment_history(100);
    assert_eq!(history.len(), 5);
    let mut ids: Vec<&str> = history.iter().map(|r| r.experiment_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["CEP-001", "CEP-002", "CEP-003", "CEP-004", "CEP-005"]);

    h.core.shutdown().await.unwrap();
}

#[tokio::test]
async fn gauntlet_is_repeatable_on_an_unperturbed_model() {
    let h = TestCore::serving();
    h.shorten_experiments(Duration::from_millis(50));
    let conductor = h.core.conductor();

    let first = conductor.run_validation_gauntlet().await.unwrap();
    let second = conductor.run_validation_gauntlet().await.unwrap();

    assert!((first.success_rate - second.success_rate).abs() < f64::EPSILON);
    assert_eq!(conductor.experiment_history(100).len(), 10);

    h.core.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_experiment_emits_learning_query() {
    let h = TestCore::serving();
    let conductor = h.core.conductor();

    // An impossible ratio floor forces a breach
    let record = conductor
        .start_experiment(
            "CEP-003",
            ExperimentOverrides {
                duration: Some(Duration::from_millis(80)),
                success_threshold: Some(1.5),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(record.outcome, ExperimentOutcome::Failed);
    let breach = record.breach.expect("breach details expected");
    assert_eq!(breach.kind, "below_threshold");

    let queries = h.core.hrc().learning_queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].experiment_id, "CEP-003");
    assert_eq!(queries[0].failure_mode, "below_threshold");

    h.core.shutdown().await.unwrap();
}

#[tokio::test]
async fn experiments_log_grows_one_line_per_run() {
    let h = TestCore::serving();
    h.shorten_experiments(Duration::from_millis(40));

    h.core
        .conductor()
        .start_experiment("CEP-004", ExperimentOverrides::default())
        .await
        .unwrap();
    h.core
        .conductor()
        .start_experiment("CEP-004", ExperimentOverrides::default())
        .await
        .unwrap();

    let log_path = h.core.config().data_root.join("experiments.log");
    let raw = std::fs::read_to_string(log_path).unwrap();
    assert_eq!(raw.lines().count(), 2);

    h.core.shutdown().await.unwrap();
}
