use crate::{Evaluator, Result};
use smc_estimators::Estimator;
use smc_sampler::{
    automaton::Automaton, kernel::KernelSource, Backend, DeviceContext, PollStatus, Probe,
    RuntimeError,
};
use smc_structs::{config::RuntimeConfig, core::ProbeReport};
use std::{thread, time::Duration};
use tracing::{debug, error};

/// Probes built once and reused for every batch. Candidates of one batch run
/// concurrently on separate queues and are polled round-robin from the
/// calling thread.
pub struct ProbePool<B: Backend> {
    probes: Vec<Probe<B>>,
    poll_interval: Duration,
}

impl<B: Backend> ProbePool<B> {
    pub fn new(probes: Vec<Probe<B>>, poll_interval: Duration) -> Self {
        Self {
            probes,
            poll_interval,
        }
    }

    /// Builds one context and probe per backend, each with its own copy of `estimators`.
    pub fn build(
        backends: impl IntoIterator<Item = B>,
        automaton: &dyn Automaton,
        properties: &[String],
        source: &dyn KernelSource,
        config: &RuntimeConfig,
        estimators: &[Box<dyn Estimator>],
    ) -> Result<Self> {
        let probes = backends
            .into_iter()
            .map(|backend| {
                let ctx = DeviceContext::build(backend, automaton, properties, source, config)?;
                Probe::new(ctx, config.clone(), estimators.to_vec())
            })
            .collect::<std::result::Result<Vec<_>, RuntimeError>>()?;
        Ok(Self::new(
            probes,
            Duration::from_micros(config.poll_interval_us),
        ))
    }

    pub fn probes(&self) -> &[Probe<B>] {
        &self.probes
    }

    fn abort_all(&mut self) {
        for probe in self.probes.iter_mut() {
            probe.abort();
        }
    }

    fn run_batch(
        &mut self,
        candidates: &[Vec<f32>],
        budget: u64,
        sample_offset: u64,
    ) -> Result<Vec<ProbeReport>> {
        let n = candidates.len();
        for (probe, candidate) in self.probes.iter_mut().zip(candidates.iter()) {
            probe.set_sample_budget(budget);
            probe.start(candidate, sample_offset)?;
        }
        let mut finished = vec![false; n];
        while finished.iter().any(|done| !done) {
            let mut progressed = false;
            for (i, probe) in self.probes.iter_mut().take(n).enumerate() {
                if finished[i] {
                    continue;
                }
                match probe.poll()? {
                    PollStatus::Finished => {
                        finished[i] = true;
                        progressed = true;
                    }
                    PollStatus::Progressed => progressed = true,
                    PollStatus::Idle => {}
                }
            }
            if !progressed {
                thread::sleep(self.poll_interval);
            }
        }
        let reports = self
            .probes
            .iter_mut()
            .take(n)
            .map(|probe| probe.finish())
            .collect::<std::result::Result<Vec<_>, RuntimeError>>()?;
        Ok(reports)
    }
}

impl<B: Backend> Evaluator for ProbePool<B> {
    fn dimension(&self) -> usize {
        self.probes
            .first()
            .map_or(0, |probe| probe.context().parameter_count())
    }

    fn capacity(&self) -> usize {
        self.probes.len()
    }

    fn evaluate(
        &mut self,
        candidates: &[Vec<f32>],
        budget: u64,
        sample_offset: u64,
    ) -> Result<Vec<ProbeReport>> {
        if candidates.len() > self.probes.len() {
            return Err(RuntimeError::Precondition(format!(
                "{} candidates for {} probes",
                candidates.len(),
                self.probes.len()
            ))
            .into());
        }
        debug!(
            "evaluating {} candidates with {} samples from offset {}",
            candidates.len(),
            budget,
            sample_offset
        );
        let result = self.run_batch(candidates, budget, sample_offset);
        if let Err(e) = &result {
            error!("batch of {} candidates failed: {}", candidates.len(), e);
            self.abort_all();
        }
        result
    }

    fn release(&mut self) {
        self.abort_all();
        for probe in self.probes.iter_mut() {
            probe.context_mut().release();
        }
    }
}
