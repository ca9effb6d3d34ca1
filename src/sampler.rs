//! Repeated, strictly sequential timin' o' a prepared strategy

use std::hint::black_box;
use std::time::{Duration, Instant};

use crate::error::StrategyError;
use crate::strategy::PreparedInvocation;

/// Ordered latencies, wan per run
///
/// Only [`Sampler::run`] can append; everyone else gets a read-only view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    durations: Vec<Duration>,
}

impl Sample {
    fn with_capacity(count: usize) -> Self {
        Sample {
            durations: Vec::with_capacity(count),
        }
    }

    fn push(&mut self, elapsed: Duration) {
        self.durations.push(elapsed);
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    pub fn durations(&self) -> &[Duration] {
        &self.durations
    }

    pub fn total(&self) -> Duration {
        self.durations.iter().sum()
    }

    /// Mean latency, or `None` fer an empty sample
    pub fn mean(&self) -> Option<Duration> {
        let n = u32::try_from(self.durations.len()).ok()?;
        if n == 0 {
            return None;
        }
        Some(self.total() / n)
    }

    /// Mean in fractional milliseconds
    pub fn mean_ms(&self) -> Option<f64> {
        if self.durations.is_empty() {
            return None;
        }
        Some(self.total().as_secs_f64() * 1000.0 / self.durations.len() as f64)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sampler;

impl Sampler {
    pub fn new() -> Self {
        Sampler
    }

    /// Invoke `handle` `count` times back tae back, timin' each call
    ///
    /// The first failure stops the loop an' the partial sample is dropped.
    pub fn run(
        &self,
        handle: &mut dyn PreparedInvocation,
        input: i64,
        count: usize,
    ) -> Result<Sample, StrategyError> {
        let mut sample = Sample::with_capacity(count);
        for _ in 0..count {
            let start = Instant::now();
            let result = handle.invoke(black_box(input))?;
            let elapsed = start.elapsed();
            black_box(result);
            sample.push(elapsed);
        }
        Ok(sample)
    }
}
