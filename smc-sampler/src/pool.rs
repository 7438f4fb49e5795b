use std::collections::{BTreeSet, VecDeque};

/// Fixed set of buffer slot indices `0..period`, each of which is free,
/// in flight on the device, or completed and waiting to be read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPool {
    period: usize,
    free: BTreeSet<usize>,
    in_flight: BTreeSet<usize>,
    ready: VecDeque<usize>,
}

impl IndexPool {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            free: (0..period).collect(),
            in_flight: BTreeSet::new(),
            ready: VecDeque::new(),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    /// Issues the lowest free index.
    pub fn acquire(&mut self) -> Option<usize> {
        let index = self.free.pop_first()?;
        self.in_flight.insert(index);
        Some(index)
    }

    /// Moves an in-flight index to the ready queue. Returns false if it was not in flight.
    pub fn mark_ready(&mut self, index: usize) -> bool {
        if self.in_flight.remove(&index) {
            self.ready.push_back(index);
            true
        } else {
            false
        }
    }

    /// Removes up to `n` ready indices in completion order and returns them to the free set.
    pub fn release_ready(&mut self, n: usize) -> Vec<usize> {
        let n = n.min(self.ready.len());
        let released: Vec<usize> = self.ready.drain(..n).collect();
        self.free.extend(released.iter().copied());
        released
    }

    pub fn is_batch_ready(&self) -> bool {
        self.ready.len() >= self.period
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.period);
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn free_indices(&self) -> Vec<usize> {
        self.free.iter().copied().collect()
    }

    /// Every index is in exactly one of the three sets.
    pub fn is_conserved(&self) -> bool {
        let mut seen = BTreeSet::new();
        let all = self
            .free
            .iter()
            .chain(self.in_flight.iter())
            .chain(self.ready.iter());
        for &index in all {
            if index >= self.period || !seen.insert(index) {
                return false;
            }
        }
        seen.len() == self.period
    }
}
