//! The wee workload under test - a memoized Fibonacci-style recurrence
//!
//! Every benchmark strategy ends up callin' [`RecurrenceEngine::get`], whether
//! directly or through the script runtime. The engine is deliberately simple:
//! a fixed-capacity cache seeded wi' the base cases an' filled top-down.

use crate::error::RangeError;

/// Default cache capacity - inputs 0..=100 are valid
pub const DEFAULT_CAPACITY: usize = 101;

/// Deepest the top-down fill is allowed tae recurse in one go
const FILL_STRIDE: usize = 256;

/// Memoized recurrence wi' a fixed-capacity cache
///
/// Arithmetic is `i64` wi' wrapping addition. Values past index 92 dinnae fit
/// in an `i64` an' wrap silently; raise the capacity beyond that an' the
/// results are only guid fer timing, no' fer sums.
#[derive(Debug, Clone)]
pub struct RecurrenceEngine {
    cache: Vec<Option<i64>>,
    // every slot up tae here is filled
    filled: usize,
}

impl RecurrenceEngine {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Capacities below 2 still seed whatever base cases fit
    pub fn with_capacity(capacity: usize) -> Self {
        let mut cache = vec![None; capacity];
        if let Some(slot) = cache.get_mut(0) {
            *slot = Some(0);
        }
        if let Some(slot) = cache.get_mut(1) {
            *slot = Some(1);
        }
        RecurrenceEngine { cache, filled: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.cache.len()
    }

    /// Get the n-th value, fillin' the cache on the way
    ///
    /// Big capacities are warmed upward in strides first, so the recursion
    /// never goes deeper than a few hundred frames.
    pub fn get(&mut self, n: i64) -> Result<i64, RangeError> {
        let idx = self.index(n)?;
        while idx > self.filled + FILL_STRIDE {
            let next = self.filled + FILL_STRIDE;
            self.fill(next);
            self.filled = next;
        }
        let v = self.fill(idx);
        self.filled = self.filled.max(idx);
        Ok(v)
    }

    fn index(&self, n: i64) -> Result<usize, RangeError> {
        let err = RangeError {
            index: n,
            capacity: self.capacity(),
        };
        let idx = usize::try_from(n).map_err(|_| err)?;
        if idx >= self.capacity() {
            return Err(err);
        }
        Ok(idx)
    }

    // idx is awready range-checked
    fn fill(&mut self, idx: usize) -> i64 {
        if let Some(v) = self.cache[idx] {
            return v;
        }
        let v = self.fill(idx - 1).wrapping_add(self.fill(idx - 2));
        self.cache[idx] = Some(v);
        v
    }

    pub fn is_cached(&self, n: i64) -> bool {
        self.index(n)
            .map(|idx| self.cache[idx].is_some())
            .unwrap_or(false)
    }

    /// How many slots are populated
    pub fn cached_len(&self) -> usize {
        self.cache.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn cached_values(&self) -> &[Option<i64>] {
        &self.cache
    }
}

impl Default for RecurrenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterative reference wi' the same wrapping semantics as the engine
pub fn reference_value(n: u64) -> i64 {
    let (mut a, mut b) = (0i64, 1i64);
    for _ in 0..n {
        let next = a.wrapping_add(b);
        a = b;
        b = next;
    }
    a
}
