use crate::{Evaluator, OptimizerError, Result};
use rand::{rngs::StdRng, seq::index, Rng, SeedableRng};
use smc_structs::{
    config::OptimizerConfig,
    core::{ProbeReport, TrajectoryRecord},
};
use tracing::{debug, info, warn};

/// Number of probes needed to evaluate one batch for a model with `branch_count` parameters.
pub fn probe_count(config: &OptimizerConfig, branch_count: usize) -> usize {
    1 << config.perturbation_width(branch_count).min(branch_count)
}

/// All `2^coords.len()` sign combinations of a step on `coords`. Bit `j` of
/// the combination index set means `+step` on `coords[j]`. Results are
/// clamped to `[0, 1]`.
pub fn candidates(incumbent: &[f32], coords: &[usize], step: f32) -> Vec<Vec<f32>> {
    (0..1usize << coords.len())
        .map(|pattern| {
            let mut candidate = incumbent.to_vec();
            for (j, &c) in coords.iter().enumerate() {
                candidate[c] = (candidate[c] + signed_step(pattern, j, step)).clamp(0.0, 1.0);
            }
            candidate
        })
        .collect()
}

fn signed_step(pattern: usize, j: usize, step: f32) -> f32 {
    if pattern & (1 << j) != 0 {
        step
    } else {
        -step
    }
}

/// Repeats the step of `pattern` from `from`, or `None` when it would leave `[0, 1]`.
pub fn extend(from: &[f32], coords: &[usize], pattern: usize, step: f32) -> Option<Vec<f32>> {
    let mut next = from.to_vec();
    for (j, &c) in coords.iter().enumerate() {
        let value = next[c] + signed_step(pattern, j, step);
        if !(0.0..=1.0).contains(&value) {
            return None;
        }
        next[c] = value;
    }
    Some(next)
}

/// Index of the highest estimate. Ties go to the earliest candidate.
pub fn select_best(reports: &[ProbeReport]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, report) in reports.iter().enumerate() {
        if best.map_or(true, |b| report.estimate > reports[b].estimate) {
            best = Some(i);
        }
    }
    best
}

/// Search state between two batches.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerState {
    pub incumbent: Vec<f32>,
    pub best: ProbeReport,
    pub budget: u64,
    pub stale_batches: u32,
    pub iteration: u64,
    pub samples_consumed: u64,
    pub sample_offset: u64,
    /// Device seconds spent so far.
    pub elapsed_secs: f64,
}

impl OptimizerState {
    pub fn new(incumbent: Vec<f32>, best: ProbeReport, budget: u64) -> Self {
        Self {
            incumbent,
            best,
            budget,
            stale_batches: 0,
            iteration: 0,
            samples_consumed: 0,
            sample_offset: 0,
            elapsed_secs: 0.0,
        }
    }

    /// Accounts for one evaluation call.
    fn consumed(mut self, reports: &[ProbeReport]) -> Self {
        self.samples_consumed += reports.iter().map(|r| r.samples_confirmed).sum::<u64>();
        self.sample_offset += reports
            .iter()
            .map(|r| r.samples_submitted)
            .max()
            .unwrap_or(0);
        // candidates of one call run concurrently
        self.elapsed_secs += reports
            .iter()
            .map(|r| r.kernel_time_ms)
            .fold(0.0, f64::max)
            / 1000.0;
        self
    }

    pub fn improve(self, incumbent: Vec<f32>, best: ProbeReport) -> Self {
        Self {
            incumbent,
            best,
            stale_batches: 0,
            ..self
        }
    }

    /// Counts a batch without improvement and grows the budget after enough
    /// consecutive stale batches.
    pub fn stale(self, config: &OptimizerConfig) -> Self {
        let mut next = Self {
            stale_batches: self.stale_batches + 1,
            ..self
        };
        if next.stale_batches >= config.stale_batches_before_growth {
            let grown = (next.budget as f64 * config.budget_growth) as u64;
            next.budget = grown.max(next.budget + 1);
            next.stale_batches = 0;
        }
        next
    }

    /// Replaces the incumbent's estimate with one measured at the current budget.
    pub fn refresh(self, best: ProbeReport) -> Self {
        Self { best, ..self }
    }

    pub fn record(&self, improved: bool) -> TrajectoryRecord {
        TrajectoryRecord {
            iteration: self.iteration,
            sample_budget: self.budget,
            elapsed_secs: self.elapsed_secs,
            samples_consumed: self.samples_consumed,
            estimate: self.best.estimate,
            lower: self.best.lower(),
            upper: self.best.upper(),
            improved,
            parameters: self.incumbent.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Optimization {
    pub parameters: Vec<f32>,
    pub best: ProbeReport,
    pub trajectory: Vec<TrajectoryRecord>,
}

/// Calls `release` on the evaluator however the search ends.
struct ReleaseGuard<'a, E: Evaluator>(&'a mut E);

impl<E: Evaluator> Drop for ReleaseGuard<'_, E> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Randomised coordinate search maximising the estimate returned by an
/// [`Evaluator`].
pub struct Optimizer<E: Evaluator> {
    config: OptimizerConfig,
    evaluator: E,
    rng: StdRng,
}

impl<E: Evaluator> Optimizer<E> {
    pub fn new(evaluator: E, config: OptimizerConfig) -> Self {
        let seed = smc_utils::seed_or_clock(config.seed);
        Self {
            config,
            evaluator,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn run(&mut self) -> Result<Optimization> {
        let config = self.config.clone();
        let mut guard = ReleaseGuard(&mut self.evaluator);
        let evaluator = &mut *guard.0;
        let rng = &mut self.rng;

        let n = evaluator.dimension();
        if n == 0 {
            return Err(OptimizerError::NoAdaptationBranches);
        }
        let m = config.perturbation_width(n).min(n);
        if evaluator.capacity() < 1 << m {
            return Err(smc_sampler::RuntimeError::Precondition(format!(
                "evaluator runs {} candidates at once, {} needed",
                evaluator.capacity(),
                1 << m
            ))
            .into());
        }
        info!(
            "optimizing {} parameters, up to {} perturbed per batch",
            n, m
        );

        let initial: Vec<f32> = (0..n).map(|_| rng.gen::<f32>()).collect();
        let reports = evaluate(evaluator, &[initial.clone()], config.initial_budget, 0)?;
        let mut state = OptimizerState::new(initial, reports[0].clone(), config.initial_budget)
            .consumed(&reports);
        let mut trajectory = vec![state.record(true)];

        loop {
            if state.budget > config.budget_cap {
                info!("sample budget {} exceeds cap {}", state.budget, config.budget_cap);
                break;
            }
            if config.max_iterations.is_some_and(|max| state.iteration >= max) {
                info!("reached {} iterations", state.iteration);
                break;
            }
            if config
                .time_limit_secs
                .is_some_and(|limit| state.elapsed_secs >= limit)
            {
                info!("reached time limit after {:.3}s", state.elapsed_secs);
                break;
            }
            state.iteration += 1;

            let s = rng.gen_range(1..=m);
            let coords = index::sample(rng, n, s).into_vec();
            let batch = candidates(&state.incumbent, &coords, config.step);
            let reports = evaluate(evaluator, &batch, state.budget, state.sample_offset)?;
            state = state.consumed(&reports);
            let Some(winner) = select_best(&reports) else {
                continue;
            };

            if reports[winner].estimate > state.best.estimate {
                state = state.improve(batch[winner].clone(), reports[winner].clone());
                // keep walking in the winning direction while it pays off
                while let Some(next) = extend(&state.incumbent, &coords, winner, config.step) {
                    let reports = evaluate(evaluator, &[next.clone()], state.budget, state.sample_offset)?;
                    state = state.consumed(&reports);
                    if reports[0].estimate > state.best.estimate {
                        state = state.improve(next, reports[0].clone());
                    } else {
                        break;
                    }
                }
                info!(
                    "iteration {}: estimate {:.6} [{:.6}, {:.6}] with budget {}",
                    state.iteration,
                    state.best.estimate,
                    state.best.lower(),
                    state.best.upper(),
                    state.budget
                );
                trajectory.push(state.record(true));
            } else {
                state = state.stale(&config);
                let reports = evaluate(
                    evaluator,
                    &[state.incumbent.clone()],
                    state.budget,
                    state.sample_offset,
                )?;
                state = state.consumed(&reports).refresh(reports[0].clone());
                warn!(
                    "iteration {}: no improvement, incumbent re-estimated at {:.6}, budget {}",
                    state.iteration, state.best.estimate, state.budget
                );
                trajectory.push(state.record(false));
            }
        }

        debug!(
            "search finished after {} iterations and {} samples",
            state.iteration, state.samples_consumed
        );
        Ok(Optimization {
            parameters: state.incumbent,
            best: state.best,
            trajectory,
        })
    }
}

fn evaluate<E: Evaluator>(
    evaluator: &mut E,
    candidates: &[Vec<f32>],
    budget: u64,
    sample_offset: u64,
) -> Result<Vec<ProbeReport>> {
    let reports = evaluator.evaluate(candidates, budget, sample_offset)?;
    if reports.len() != candidates.len() {
        return Err(smc_sampler::RuntimeError::Precondition(format!(
            "{} reports for {} candidates",
            reports.len(),
            candidates.len()
        ))
        .into());
    }
    Ok(reports)
}
