mod common;

use common::{FakeSimulator, Fixture, TARGET_D, TARGET_LOG_TAUN};
use jvfit::{CalibrationError, Calibrator, CellRef, DEFAULT_FAILURE_PENALTY};
use serde_json::json;

#[test]
fn lbfgs_recovers_lifetime_and_thickness() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["optimizer"] = json!({"kind": "lbfgs", "max_iterations": 30});
    let calibrator = Calibrator::new(fx.write_job(&job));

    let run = calibrator.calibrate_with(FakeSimulator::new()).unwrap();
    let result = &run.result;

    assert_eq!(result.solver, "L-BFGS");
    let tau = result.get_parameter("tau").unwrap();
    let d = result.get_parameter("d_absorber").unwrap();
    assert!((tau.value - TARGET_LOG_TAUN).abs() < 0.05, "tau = {}", tau.value);
    assert!((d.value - TARGET_D).abs() < 0.03, "d = {}", d.value);
    assert!((tau.physical - 10f64.powf(tau.value)).abs() < 1e-20);
    assert!(result.cost < 1e-2, "cost = {}", result.cost);
    assert_eq!(result.evaluations, run.callback.history().len());

    // Device file is left at the reported optimum, in both shared cells
    let device = fx.device();
    let taun = device.get_f64(&CellRef::new(1, "taun")).unwrap();
    let taup = device.get_f64(&CellRef::new(1, "taup")).unwrap();
    assert!((taun.log10() - tau.value).abs() < 1e-9);
    assert_eq!(taun, taup);
    assert!((device.get_f64(&CellRef::new(1, "d")).unwrap() - d.value).abs() < 1e-12);
}

#[test]
fn bayesian_improves_on_initial_guess() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["optimizer"] = json!({"kind": "bayesian", "n_calls": 15, "n_initial": 5, "n_candidates": 500});
    let calibrator = Calibrator::new(fx.write_job(&job));

    let mut simulator = FakeSimulator::new();
    let run = calibrator.calibrate_with(&mut simulator).unwrap();

    assert_eq!(run.result.solver, "GP-EI");
    assert_eq!(run.result.evaluations, 15);
    assert_eq!(simulator.runs, 15);

    let history = run.callback.history();
    // First evaluation is the initial guess
    assert_eq!(history[0].params, vec![-7.5, 0.3]);
    assert!(run.result.cost <= history[0].cost);
    for record in history {
        assert!((-9.0..=-5.0).contains(&record.params[0]));
        assert!((0.1..=0.6).contains(&record.params[1]));
    }
}

#[test]
fn bayesian_is_reproducible_for_a_seed() {
    let params = || {
        let fx = Fixture::new();
        let mut job = fx.job();
        job["optimizer"] = json!({"kind": "bayesian", "n_calls": 8, "n_initial": 4, "n_candidates": 200, "seed": 7});
        let calibrator = Calibrator::new(fx.write_job(&job));
        calibrator
            .calibrate_with(FakeSimulator::new())
            .unwrap()
            .result
            .values()
    };
    assert_eq!(params(), params());
}

#[test]
fn evaluation_cap_stops_the_run() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["max_evaluations"] = json!(3);
    let calibrator = Calibrator::new(fx.write_job(&job));

    let mut simulator = FakeSimulator::new();
    let run = calibrator.calibrate_with(&mut simulator).unwrap();

    assert_eq!(run.result.evaluations, 3);
    assert_eq!(simulator.runs, 3);
    assert!(!run.result.success);
    assert_eq!(run.result.message, "Evaluation budget exhausted");
}

#[test]
fn exact_parameters_give_zero_loss() {
    let fx = Fixture::new();
    let calibrator = Calibrator::new(fx.write_job(&fx.job()));

    let loss = calibrator
        .evaluate_with(FakeSimulator::new(), Some(&[TARGET_LOG_TAUN, TARGET_D]))
        .unwrap();
    assert!(loss.abs() < 1e-20, "loss = {}", loss);

    let initial = calibrator.evaluate_with(FakeSimulator::new(), None).unwrap();
    assert!(initial > 0.0);
}

#[test]
fn iae_loss_is_configurable() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["objective"]["loss"] = json!("iae");
    let calibrator = Calibrator::new(fx.write_job(&job));

    // Shift k1 by 0.5 only: |dJ| = 0.5 (1 - V) integrated over [0, 1.05]
    let loss = calibrator
        .evaluate_with(FakeSimulator::new(), Some(&[-7.5, TARGET_D]))
        .unwrap();
    // |1 - V| integrates to 0.5 on [0, 1] plus 0.00125 on [1, 1.05]
    let expected = 0.5 * 0.50125;
    assert!((loss - expected).abs() < 1e-9, "loss = {}", loss);
}

#[test]
fn stat_objective_scores_named_metric() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["objective"] = json!({"kind": "stat", "metric": "efficiency_r", "transform": "neg_square"});
    let calibrator = Calibrator::new(fx.write_job(&job));

    // k1 = 3, k2 = 2 -> efficiency 6
    let loss = calibrator
        .evaluate_with(FakeSimulator::new(), Some(&[TARGET_LOG_TAUN, TARGET_D]))
        .unwrap();
    assert!((loss + 36.0).abs() < 1e-9, "loss = {}", loss);
}

#[test]
fn failed_run_is_penalised() {
    let fx = Fixture::new();
    let calibrator = Calibrator::new(fx.write_job(&fx.job()));

    // k1 = 4.5 for tau = 10^-5.5
    let loss = calibrator
        .evaluate_with(FakeSimulator::failing_above(4.0), Some(&[-5.5, 0.3]))
        .unwrap();
    assert_eq!(loss, DEFAULT_FAILURE_PENALTY);
}

#[test]
fn missing_output_is_penalised_not_reused() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["failure_penalty"] = json!(1e6);
    let calibrator = Calibrator::new(fx.write_job(&job));

    // Leaves JV.csv behind
    calibrator.evaluate_with(FakeSimulator::new(), None).unwrap();
    assert!(fx.workdir().join("JV.csv").exists());

    let silent = FakeSimulator {
        silent: true,
        ..FakeSimulator::default()
    };
    let loss = calibrator.evaluate_with(silent, None).unwrap();
    assert_eq!(loss, 1e6);
}

#[test]
fn lbfgs_survives_penalised_region() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["optimizer"] = json!({"kind": "lbfgs", "max_iterations": 10});
    let calibrator = Calibrator::new(fx.write_job(&job));

    // Everything above tau = 10^-6.5 fails; the optimum at -7 is still reachable
    let run = calibrator
        .calibrate_with(FakeSimulator::failing_above(3.5))
        .unwrap();
    assert!(run.result.cost < DEFAULT_FAILURE_PENALTY);
    assert!(run.result.values()[0] <= -6.5);
}

#[test]
fn missing_program_aborts() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["simulator"]["program"] = json!("/nonexistent/octave-cli");
    let calibrator = Calibrator::new(fx.write_job(&job));

    let err = calibrator.evaluate(None).unwrap_err();
    assert!(matches!(err, CalibrationError::Spawn { .. }), "{err}");
}

#[test]
fn read_only_device_file_aborts() {
    let fx = Fixture::new();
    let calibrator = Calibrator::new(fx.write_job(&fx.job()));

    let path = fx.device_file();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(&path, perms).unwrap();

    let err = calibrator
        .evaluate_with(FakeSimulator::new(), None)
        .unwrap_err();
    assert!(matches!(err, CalibrationError::ReadOnly(_)), "{err}");
}

#[test]
fn wrong_point_length_is_rejected() {
    let fx = Fixture::new();
    let calibrator = Calibrator::new(fx.write_job(&fx.job()));
    let err = calibrator
        .evaluate_with(FakeSimulator::new(), Some(&[-7.0]))
        .unwrap_err();
    assert!(matches!(err, CalibrationError::Config(_)), "{err}");
}

#[test]
fn lbfgs_reports_failure_when_every_run_fails() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["optimizer"] = json!({"kind": "lbfgs", "max_iterations": 5});
    let calibrator = Calibrator::new(fx.write_job(&job));

    let run = calibrator
        .calibrate_with(FakeSimulator::failing_above(-100.0))
        .unwrap();
    assert!(!run.result.success);
    assert_eq!(run.result.message, "Every evaluation failed");
    assert_eq!(run.result.cost, DEFAULT_FAILURE_PENALTY);
}

#[test]
fn reference_above_voltage_limit_aborts_before_simulating() {
    let fx = Fixture::new();
    let mut job = fx.job();
    job["objective"]["voltage_limit"] = json!(-1.0);
    let calibrator = Calibrator::new(fx.write_job(&job));

    let mut simulator = FakeSimulator::new();
    let err = calibrator.evaluate_with(&mut simulator, None).unwrap_err();
    assert!(matches!(err, CalibrationError::Config(_)), "{err}");
    assert_eq!(simulator.runs, 0);
}
