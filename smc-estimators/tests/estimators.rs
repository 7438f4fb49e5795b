use rand::{rngs::StdRng, Rng, SeedableRng};
use smc_estimators::{sprt::Decision, *};
use smc_structs::config::EstimatorConfig;

fn feed(estimator: &mut dyn Estimator, successes: u64, failures: u64) {
    for _ in 0..successes {
        estimator.add_sample(true);
    }
    for _ in 0..failures {
        estimator.add_sample(false);
    }
}

#[test]
fn test_ci_fixed_count() {
    let mut ci = ConfidenceInterval::new(0.05, 400).unwrap();
    assert_eq!(ci.required_samples(), Some(400));
    feed(&mut ci, 100, 300);
    assert!(!ci.should_stop_now(399));
    assert!(ci.should_stop_now(400));
    ci.compute_missing_parameter_after_sim();
    assert_eq!(ci.result(), 0.25);
    // 1.95996 * sqrt(0.25 * 0.75 / 400)
    assert!((ci.missing_parameter() - 0.042435).abs() < 1e-5);
}

#[test]
fn test_ci_budget_and_reset() {
    let mut ci = ConfidenceInterval::new(0.01, 10).unwrap();
    ci.set_sample_budget(44_000);
    assert_eq!(ci.required_samples(), Some(44_000));
    feed(&mut ci, 3, 1);
    assert_eq!(ci.samples(), 4);
    ci.reset();
    assert_eq!(ci.samples(), 0);
    assert_eq!(ci.result(), 0.0);
    assert!(ci.missing_parameter().is_infinite());
}

#[test]
fn test_ci_rejects_invalid_parameters() {
    assert!(ConfidenceInterval::new(0.0, 10).is_err());
    assert!(ConfidenceInterval::new(1.5, 10).is_err());
    assert!(ConfidenceInterval::new(0.05, 0).is_err());
}

#[test]
fn test_apmc_sample_count() {
    let apmc = Apmc::new(0.01, 0.05).unwrap();
    // ln(40) / (2 * 0.0001) = 18444.4
    assert_eq!(apmc.required_samples(), Some(18445));
    assert_eq!(apmc::chernoff_samples(0.1, 0.1), 150);
}

#[test]
fn test_apmc_budget_tightens_epsilon() {
    let mut apmc = Apmc::new(0.05, 0.05).unwrap();
    let before = apmc.missing_parameter();
    apmc.set_sample_budget(100_000);
    assert!(apmc.missing_parameter() < before);
    assert_eq!(apmc.required_samples(), Some(100_000));
}

#[test]
fn test_ci_iterations_waits_for_width() {
    let mut est = CiIterations::new(0.05, 0.01, 100).unwrap();
    assert_eq!(est.required_samples(), None);
    feed(&mut est, 50, 50);
    assert!(!est.should_stop_now(99));
    // half width at n = 100 is ~0.098
    assert!(!est.should_stop_now(100));
    feed(&mut est, 5000, 5000);
    // half width at n = 10100 is ~0.00975
    assert!(est.should_stop_now(10_100));
    assert!(est.missing_parameter() <= 0.01);
}

#[test]
fn test_ci_iterations_degenerate_outcomes_stop_immediately() {
    let mut est = CiIterations::new(0.05, 0.01, 10).unwrap();
    feed(&mut est, 10, 0);
    assert!(est.should_stop_now(10));
    assert_eq!(est.result(), 1.0);
}

#[test]
fn test_sprt_accepts_high_probability() {
    let mut sprt = Sprt::new(0.5, 0.05, 0.01, 0.01).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let mut n = 0;
    while !sprt.should_stop_now(n) {
        sprt.add_sample(rng.gen::<f64>() < 0.9);
        n += 1;
        assert!(n < 10_000);
    }
    assert_eq!(sprt.decision(), Some(Decision::Holds));
    assert_eq!(sprt.result(), 1.0);
}

#[test]
fn test_sprt_rejects_low_probability() {
    let mut sprt = Sprt::new(0.5, 0.05, 0.01, 0.01).unwrap();
    let mut n = 0;
    while !sprt.should_stop_now(n) {
        sprt.add_sample(false);
        n += 1;
        assert!(n < 10_000);
    }
    assert_eq!(sprt.decision(), Some(Decision::Fails));
    assert_eq!(sprt.result(), 0.0);
    sprt.reset();
    assert_eq!(sprt.decision(), None);
}

#[test]
fn test_sprt_rejects_indifference_outside_unit_interval() {
    assert!(Sprt::new(0.98, 0.05, 0.01, 0.01).is_err());
    assert!(Sprt::new(0.5, 0.0, 0.01, 0.01).is_err());
}

#[test]
fn test_from_config_and_clone() {
    let mut est = from_config(&EstimatorConfig::default()).unwrap();
    est.set_expression("P=? [F<=100 done]");
    assert_eq!(est.name(), "ci");
    assert_eq!(est.required_samples(), Some(40_000));
    est.add_sample(true);
    let copy = est.clone();
    assert_eq!(copy.expression(), "P=? [F<=100 done]");
    assert_eq!(copy.samples(), 1);

    let seq = from_config(&EstimatorConfig::Sprt {
        theta: 0.3,
        delta: 0.01,
        alpha: 0.05,
        beta: 0.05,
    })
    .unwrap();
    assert_eq!(seq.required_samples(), None);
}
