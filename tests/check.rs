mod common;

use common::Fixture;
use jvfit::{CalibrationConfig, CalibrationError, OptimizerConfig, SimulatorConfig};
use serde_json::json;

#[test]
fn valid_job_passes_check() {
    let fx = Fixture::new();
    let cfg = fx.write_job(&fx.job());
    cfg.check().unwrap();

    assert_eq!(cfg.workdir(), fx.workdir());
    assert_eq!(cfg.device_path(), fx.device_file());
    assert_eq!(cfg.optimizer, OptimizerConfig::default());
}

#[test]
fn unknown_column_fails_check() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["parameters"][0]["cells"][0]["column"] = json!("tau_n");
    let err = fx.write_job(&job).check().unwrap_err();
    assert!(matches!(err, CalibrationError::UnknownColumn { .. }), "{err}");
}

#[test]
fn row_past_the_last_layer_fails_check() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["parameters"][1]["cells"][0]["row"] = json!(3);
    let err = fx.write_job(&job).check().unwrap_err();
    assert!(
        matches!(err, CalibrationError::RowOutOfRange { row: 3, rows: 3, .. }),
        "{err}"
    );
}

#[test]
fn missing_reference_fails_check() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["objective"]["reference"] = json!("measured/missing.csv");
    let err = fx.write_job(&job).check().unwrap_err();
    assert!(matches!(err, CalibrationError::Io { .. }), "{err}");
}

#[test]
fn duplicate_parameter_names_fail_validation() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["parameters"][1]["name"] = json!("tau");
    let err = fx.write_job(&job).validate().unwrap_err();
    assert!(err.to_string().contains("duplicate"), "{err}");
}

#[test]
fn session_simulator_config_parses() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["simulator"] = json!({
        "kind": "session",
        "program": "matlab",
        "args": ["-nodesktop", "-nosplash"],
        "script": "run('{workdir}/fast_test.m')"
    });
    job["optimizer"] = json!({"kind": "bayesian"});
    let cfg = fx.write_job(&job);
    cfg.check().unwrap();

    match &cfg.simulator {
        SimulatorConfig::Session {
            timeout_secs,
            wrapper,
            ..
        } => {
            assert_eq!(*timeout_secs, 600);
            assert!(wrapper.is_none());
        }
        other => panic!("unexpected simulator {:?}", other),
    }
}

#[test]
fn unparseable_job_reports_its_path() {
    let fx = Fixture::new();
    let path = fx.path().join("broken.json");
    std::fs::write(&path, "{\"workdir\": ").unwrap();
    let err = CalibrationConfig::load(&path).unwrap_err();
    assert!(matches!(err, CalibrationError::Json { .. }), "{err}");
    assert!(err.to_string().contains("broken.json"));
}

#[test]
fn reference_clipped_by_voltage_limit_fails_check() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["objective"]["voltage_limit"] = json!(-1.0);
    let err = fx.write_job(&job).check().unwrap_err();
    assert!(matches!(err, CalibrationError::Config(_)), "{err}");
    assert!(err.to_string().contains("-1 V"), "{err}");
}
