use serde_json::json;
use smc_structs::{config::*, core::*};
use smc_utils::{dejsonify, jsonify};

#[test]
fn test_runtime_config_defaults_fill_missing_fields() {
    let config: RuntimeConfig =
        dejsonify(r#"{"max_path_length": 250, "prng_seed": 9}"#).unwrap();
    assert_eq!(config.max_path_length, 250);
    assert_eq!(config.prng_seed(), Some(&9));
    assert_eq!(config.result_check_period, 4);
    assert_eq!(config.path_check_period, 8);
    assert_eq!(config.entry_point, "sample_kernel");
    assert_eq!(config.local_work_size(), None);
    assert_eq!(config.direct_work_size(true), 100_000);
    assert_eq!(config.indirect_work_size(false), 4_096);
}

#[test]
fn test_optimizer_config_defaults() {
    let config: OptimizerConfig = dejsonify("{}").unwrap();
    assert_eq!(config, OptimizerConfig::default());
    assert_eq!(config.step, 0.05);
    assert_eq!(config.initial_budget, 40_000);
    assert_eq!(config.budget_cap, 1_800_000);
}

#[test]
fn test_perturbation_width() {
    let config = OptimizerConfig::default();
    assert_eq!(config.perturbation_width(6), 3);
    assert_eq!(config.perturbation_width(20), 3);
    assert_eq!(config.perturbation_width(5), 3);
    assert_eq!(config.perturbation_width(4), 3);
    assert_eq!(config.perturbation_width(3), 2);
    assert_eq!(config.perturbation_width(1), 1);
}

#[test]
fn test_estimator_config_tagged() {
    let config: EstimatorConfig = serde_json::from_value(json!({
        "method": "ci_iterations",
        "alpha": 0.05,
        "width": 0.01,
        "min_samples": 1000
    }))
    .unwrap();
    assert_eq!(
        config,
        EstimatorConfig::CiIterations {
            alpha: 0.05,
            width: 0.01,
            min_samples: 1000
        }
    );
    assert!(serde_json::from_value::<EstimatorConfig>(json!({"method": "bogus"})).is_err());
}

#[test]
fn test_model_description() {
    let model: ModelDescription = serde_json::from_value(json!({
        "variables": [
            {"name": "s", "min_value": 0, "max_value": 3, "init_value": 0},
            {"name": "adapt_route_choice", "min_value": 0, "max_value": 1}
        ],
        "commands": [
            {"module": "m", "guard": "s=0", "updates": ["1:(s'=1)"]},
            {"module": "m", "label": "adapt_route_a", "guard": "s=1", "updates": ["(s'=2)"]}
        ]
    }))
    .unwrap();
    assert_eq!(model.variables.len(), 2);
    assert_eq!(model.variables[1].init_value(), None);
    assert_eq!(model.commands[0].label, "");
    assert_eq!(model.commands[1].label, "adapt_route_a");
}

#[test]
fn test_trajectory_record_line() {
    let record = TrajectoryRecord {
        iteration: 3,
        sample_budget: 44000,
        elapsed_secs: 1.5,
        samples_consumed: 352000,
        estimate: 0.75,
        lower: 0.74,
        upper: 0.76,
        improved: true,
        parameters: vec![0.5, 1.0],
    };
    assert_eq!(
        record.to_string(),
        "3 44000 1.500000 352000 0.750000 0.740000 0.760000 0.5 1"
    );
    assert!(jsonify(&record).unwrap().starts_with(r#"{"elapsed_secs":1.5,"estimate":0.75"#));
}

#[test]
fn test_probe_report_bounds() {
    let report = ProbeReport {
        estimate: 0.5,
        half_width: 0.125,
        samples_submitted: 10,
        samples_confirmed: 10,
        kernel_time_ms: 0.0,
        min_path_length: 1,
        max_path_length: 4,
        avg_path_length: 2.5,
    };
    assert_eq!(report.lower(), 0.375);
    assert_eq!(report.upper(), 0.625);
}
