use rand::{
    rngs::{SmallRng, StdRng},
    Rng, SeedableRng,
};
use smc_estimators::{CiIterations, ConfidenceInterval, Estimator};
use smc_sampler::{
    automaton::Model,
    context::DeviceContext,
    host::{HostBackend, HostKernel},
    kernel::StaticKernelSource,
    pool::IndexPool,
    sampling::{decode_outcome, Adaptive, SamplingState},
    PollStatus, Probe, RuntimeError,
};
use smc_structs::{
    config::RuntimeConfig,
    core::{CommandDescription, ModelDescription, VariableDescription},
};

const SOURCE: &str = "extern \"C\" __global__ void sample_kernel() {}";

/// Two adaptation branches.
fn model() -> Model {
    let command = |label: &str| CommandDescription {
        module: "m".to_string(),
        label: label.to_string(),
        guard: "true".to_string(),
        updates: vec![],
    };
    Model::from_description(&ModelDescription {
        variables: vec![VariableDescription {
            name: "adapt_a_x".to_string(),
            min_value: 0,
            max_value: 1,
            init_value: None,
        }],
        commands: vec![command("adapt_a_0"), command("adapt_a_1")],
    })
    .unwrap()
}

fn config() -> RuntimeConfig {
    RuntimeConfig {
        prng_seed: Some(42),
        local_work_size: Some(256),
        direct_work_size_cpu: 3000,
        indirect_work_size_cpu: 100,
        result_check_period: 4,
        path_check_period: 8,
        poll_interval_us: 0,
        ..RuntimeConfig::default()
    }
}

/// Satisfied with probability `parameters[0]`, path length 1..=10.
fn bernoulli(parameters: &[f32], rng: &mut SmallRng, outcomes: &mut [i8]) -> i32 {
    let satisfied = rng.gen::<f32>() < parameters[0];
    outcomes.iter_mut().for_each(|o| *o = satisfied as i8);
    rng.gen_range(1..=10)
}

fn constant(outcome: i8, length: i32) -> impl Fn(&[f32], &mut SmallRng, &mut [i8]) -> i32 {
    move |_: &[f32], _: &mut SmallRng, outcomes: &mut [i8]| {
        outcomes.iter_mut().for_each(|o| *o = outcome);
        length
    }
}

fn context<K: HostKernel>(backend: HostBackend<K>, config: &RuntimeConfig) -> DeviceContext<HostBackend<K>> {
    DeviceContext::build(
        backend,
        &model(),
        &["F done".to_string()],
        &StaticKernelSource(SOURCE.to_string()),
        config,
    )
    .unwrap()
}

fn fixed_estimator(samples: u64) -> Vec<Box<dyn Estimator>> {
    vec![Box::new(ConfidenceInterval::new(0.05, samples).unwrap())]
}

fn sequential_estimator(width: f64) -> Vec<Box<dyn Estimator>> {
    vec![Box::new(CiIterations::new(0.05, width, 200).unwrap())]
}

#[test]
fn test_decode_outcome() {
    assert_eq!(decode_outcome(0, 3).unwrap(), false);
    assert_eq!(decode_outcome(1, 3).unwrap(), true);
    assert!(matches!(
        decode_outcome(2, 3),
        Err(RuntimeError::UnverifiedProperty { sample: 3, outcome: 2 })
    ));
    assert!(matches!(
        decode_outcome(-1, 9),
        Err(RuntimeError::Deadlock { sample: 9 })
    ));
}

#[test]
fn test_fixed_count_dispatches_exact_samples() {
    let config = config();
    let mut probe = Probe::new(
        context(HostBackend::new(bernoulli), &config),
        config,
        fixed_estimator(10000),
    )
    .unwrap();
    let report = probe.run(&[0.5, 0.5], 0).unwrap();

    let launches = probe.context().backend().launches();
    assert_eq!(launches.len(), 4);
    assert_eq!(launches.iter().map(|l| l.samples as u64).sum::<u64>(), 10000);
    for launch in launches {
        assert_eq!(launch.local_size, 256);
        assert_eq!(launch.global_size % 256, 0);
        assert!(launch.global_size >= launch.samples);
        assert!(launch.samples <= 3000);
    }
    assert_eq!(probe.context().submitted(), 10000);
    assert_eq!(report.samples_submitted, 10000);
    assert_eq!(report.samples_confirmed, 10000);
    assert_eq!(probe.estimators()[0].samples(), 10000);
    assert!((report.estimate - 0.5).abs() < 0.03);
    assert!(report.half_width > 0.0 && report.half_width < 0.02);
    assert!(report.min_path_length >= 1 && report.max_path_length <= 10);
    assert!(report.avg_path_length > 4.0 && report.avg_path_length < 7.0);
    assert!(!probe.is_running());
    assert_eq!(probe.context().backend().open_queues(), 0);
}

#[test]
fn test_fixed_count_process_is_idempotent() {
    let config = config();
    let mut ctx = context(HostBackend::new(constant(1, 7)), &config);
    let queue = ctx.create_queue().unwrap();
    let mut estimators = fixed_estimator(500);
    let mut state: SamplingState<HostBackend<_>> =
        SamplingState::select(&estimators, &config, false);
    assert!(matches!(state, SamplingState::Fixed(_)));

    state.update_sampling(&mut ctx, &queue, &[0.1, 0.2], 0).unwrap();
    assert!(state.process_results(&mut ctx, &queue, &mut estimators).unwrap());
    assert!(state.process_results(&mut ctx, &queue, &mut estimators).unwrap());
    assert_eq!(estimators[0].samples(), 500);
    assert_eq!(state.progress().confirmed, 500);
    assert_eq!(state.progress().paths.min(), Some(7));
    assert_eq!(state.progress().paths.max(), Some(7));
    assert_eq!(state.progress().paths.average(), 7.0);
    assert_eq!(ctx.backend().parameters(), &[0.1, 0.2]);
    ctx.release_queue(queue);
}

#[test]
fn test_fixed_count_reuses_buffers() {
    let config = config();
    let mut probe = Probe::new(
        context(HostBackend::new(bernoulli), &config),
        config,
        fixed_estimator(2000),
    )
    .unwrap();
    let first = probe.run(&[0.3, 0.3], 0).unwrap();
    let allocations = probe.context().backend().allocations();
    let second = probe.run(&[0.3, 0.3], 0).unwrap();
    assert_eq!(probe.context().backend().allocations(), allocations);
    assert_eq!(first.estimate, second.estimate);

    // a larger budget forces a reallocation
    probe.set_sample_budget(5000);
    let third = probe.run(&[0.3, 0.3], 0).unwrap();
    assert_eq!(third.samples_confirmed, 5000);
    assert_eq!(probe.context().backend().allocations(), allocations + 1);
}

#[test]
fn test_same_offset_gives_common_random_numbers() {
    let config = config();
    let run = |offset: u64| {
        let mut probe = Probe::new(
            context(HostBackend::new(bernoulli), &config),
            config.clone(),
            fixed_estimator(4000),
        )
        .unwrap();
        probe.run(&[0.5, 0.5], offset).unwrap().estimate
    };
    assert_eq!(run(0), run(0));
    assert_eq!(run(4000), run(4000));
}

#[test]
fn test_index_pool_conservation() {
    let mut rng = StdRng::seed_from_u64(1234);
    for period in [1, 3, 4, 8] {
        let mut pool = IndexPool::new(period);
        let mut in_flight: Vec<usize> = Vec::new();
        for _ in 0..500 {
            match rng.gen_range(0..3) {
                0 => {
                    if let Some(index) = pool.acquire() {
                        assert!(!in_flight.contains(&index));
                        in_flight.push(index);
                    } else {
                        assert!(!pool.has_free());
                    }
                }
                1 if !in_flight.is_empty() => {
                    let index = in_flight.swap_remove(rng.gen_range(0..in_flight.len()));
                    assert!(pool.mark_ready(index));
                    assert!(!pool.mark_ready(index));
                }
                _ => {
                    let n = rng.gen_range(0..=period);
                    pool.release_ready(n);
                }
            }
            assert!(pool.is_conserved());
            assert_eq!(pool.free_len() + pool.in_flight_len() + pool.ready_len(), period);
            assert_eq!(pool.in_flight_len(), in_flight.len());
        }
    }
}

#[test]
fn test_adaptive_pool_conservation_out_of_order() {
    let mut rng = StdRng::seed_from_u64(99);
    let latency: Vec<usize> = (0..37).map(|_| rng.gen_range(0..6)).collect();
    let config = config();
    let mut probe = Probe::new(
        context(HostBackend::new(bernoulli).with_latency(latency), &config),
        config,
        sequential_estimator(0.02),
    )
    .unwrap();
    probe.start(&[0.5, 0.5], 0).unwrap();
    let mut polls = 0;
    loop {
        let status = probe.poll().unwrap();
        polls += 1;
        if let Some(SamplingState::Adaptive(state)) = probe.state() {
            let results = state.result_pool();
            let paths = state.path_pool();
            assert!(results.is_conserved());
            assert!(paths.is_conserved());
            assert_eq!(results.free_len() + results.in_flight_len() + results.ready_len(), 4);
            assert_eq!(paths.free_len() + paths.in_flight_len() + paths.ready_len(), 8);
            assert_eq!(state.in_flight().count(), results.in_flight_len());
            assert_eq!(state.in_flight().count(), paths.in_flight_len());
        } else {
            panic!("expected adaptive sampling");
        }
        if status == PollStatus::Finished {
            break;
        }
        assert!(polls < 10_000);
    }
    let report = probe.finish().unwrap();
    assert_eq!(report.samples_confirmed, report.samples_submitted);
    assert_eq!(report.samples_confirmed % 100, 0);
    assert!(report.samples_confirmed >= 200);
    assert_eq!(probe.estimators()[0].samples(), report.samples_confirmed);
    assert!(report.half_width <= 0.02);
    assert!((report.estimate - 0.5).abs() < 0.05);
}

#[test]
fn test_adaptive_submitted_and_confirmed_are_separate() {
    let config = config();
    let mut probe = Probe::new(
        context(HostBackend::new(constant(1, 3)).with_latency(vec![5]), &config),
        config,
        sequential_estimator(0.05),
    )
    .unwrap();
    probe.start(&[0.5, 0.5], 0).unwrap();
    assert_eq!(probe.poll().unwrap(), PollStatus::Idle);
    let progress = probe.progress().unwrap();
    // the result pool limits launches to its period
    assert_eq!(progress.submitted, 400);
    assert_eq!(progress.confirmed, 0);
    assert_eq!(probe.context().submitted(), 400);

    let report = loop {
        if probe.poll().unwrap() == PollStatus::Finished {
            break probe.finish().unwrap();
        }
    };
    assert_eq!(report.samples_confirmed, report.samples_submitted);
    assert_eq!(report.estimate, 1.0);
    assert_eq!(report.min_path_length, 3);
    assert_eq!(report.avg_path_length, 3.0);
}

#[test]
fn test_adaptive_reset_is_idempotent() {
    let config = config();
    let mut ctx = context(HostBackend::new(bernoulli).with_latency(vec![1, 0]), &config);
    let queue = ctx.create_queue().unwrap();
    let mut estimators = sequential_estimator(0.05);
    let mut state: Adaptive<_> = Adaptive::new(100, 4, 8);
    while !state
        .process_results(&mut ctx, &queue, &mut estimators)
        .unwrap()
    {
        state.update_sampling(&mut ctx, &queue, &[0.5, 0.5], 0).unwrap();
    }
    assert!(state.progress().finished);

    state.reset();
    let results = state.result_pool().clone();
    let paths = state.path_pool().clone();
    state.reset();
    assert_eq!(state.result_pool(), &results);
    assert_eq!(state.path_pool(), &paths);
    assert_eq!(results.free_indices(), vec![0, 1, 2, 3]);
    assert_eq!(paths.free_indices(), (0..8).collect::<Vec<_>>());
    assert_eq!(state.in_flight().count(), 0);
    assert_eq!(state.progress().submitted, 0);
    ctx.release_queue(queue);
}

#[test]
fn test_unverified_property_aborts_probe() {
    let config = config();
    let mut probe = Probe::new(
        context(HostBackend::new(constant(2, 4)), &config),
        config,
        fixed_estimator(1000),
    )
    .unwrap();
    let result = probe.run(&[0.5, 0.5], 0);
    assert!(matches!(
        result,
        Err(RuntimeError::UnverifiedProperty { sample: 0, outcome: 2 })
    ));
    assert!(!probe.is_running());
    assert_eq!(probe.context().backend().open_queues(), 0);
}

#[test]
fn test_deadlock_aborts_adaptive_probe() {
    let config = config();
    let mut probe = Probe::new(
        context(HostBackend::new(constant(-1, 4)).with_latency(vec![2]), &config),
        config,
        sequential_estimator(0.05),
    )
    .unwrap();
    let result = probe.run(&[0.5, 0.5], 0);
    assert!(matches!(result, Err(RuntimeError::Deadlock { .. })));
    assert!(!probe.is_running());
    assert_eq!(probe.context().backend().open_queues(), 0);

    // the probe can be used again afterwards
    assert!(probe.run(&[0.5, 0.5], 0).is_err());
    assert_eq!(probe.context().backend().open_queues(), 0);
}

#[test]
fn test_failed_launch_releases_queue() {
    let config = config();
    let mut probe = Probe::new(
        context(HostBackend::new(bernoulli).with_failure_on_launch(1), &config),
        config,
        sequential_estimator(0.05),
    )
    .unwrap();
    let result = probe.run(&[0.5, 0.5], 0);
    assert!(matches!(result, Err(RuntimeError::Device { .. })));
    assert_eq!(probe.context().backend().open_queues(), 0);
}

#[test]
fn test_parameter_count_is_checked() {
    let config = config();
    let mut probe = Probe::new(
        context(HostBackend::new(bernoulli), &config),
        config,
        fixed_estimator(100),
    )
    .unwrap();
    assert!(matches!(
        probe.run(&[0.5], 0),
        Err(RuntimeError::Precondition(_))
    ));
    assert_eq!(probe.context().backend().open_queues(), 0);
}

#[test]
fn test_probe_needs_one_estimator_per_property() {
    let config = config();
    let result = Probe::new(
        context(HostBackend::new(bernoulli), &config),
        config,
        vec![],
    );
    assert!(matches!(result, Err(RuntimeError::Precondition(_))));
}
