//! Prefix sums over per-rank timings.

/// Prefix-sum table answering `sum(vals[low..high])` in constant time.
#[derive(Debug, Clone)]
pub struct RangeSum {
    sums: Vec<u64>,
}

impl RangeSum {
    /// Build the table for `vals`.
    pub fn new(vals: &[u64]) -> Self {
        let mut sums = Vec::with_capacity(vals.len() + 1);
        let mut sum = 0u64;
        sums.push(0);
        for &v in vals {
            sum = sum.saturating_add(v);
            sums.push(sum);
        }
        Self { sums }
    }

    /// Sum of the half-open range `[low, high)`.
    #[inline]
    pub fn range_sum(&self, low: usize, high: usize) -> u64 {
        self.sums[high] - self.sums[low]
    }

    /// Number of summed values.
    #[inline]
    pub fn len(&self) -> usize {
        self.sums.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of every value.
    #[inline]
    pub fn total(&self) -> u64 {
        self.sums[self.len()]
    }
}
