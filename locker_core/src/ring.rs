//! Fixed-capacity sample history used by the arrival-time filter.

use std::collections::VecDeque;

/// Samples kept for spread statistics.
pub const CAPACITY: usize = 12;

/// Readings required before the spread is trusted.
pub const STABLE_FILL: usize = 8;

/// Ring of recent readings. The spread over a filled ring gates whether the
/// timer is stable enough to act on.
#[derive(Debug, Clone)]
pub struct Ring {
    buf: VecDeque<f64>,
}

impl Ring {
    pub fn new() -> Self {
        Self {
            buf: VecDeque::with_capacity(CAPACITY),
        }
    }

    pub fn push(&mut self, x: f64) {
        if self.buf.len() == CAPACITY {
            self.buf.pop_front();
        }
        self.buf.push_back(x);
    }

    pub fn last(&self) -> Option<f64> {
        self.buf.back().copied()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// True once enough readings have accumulated to trust the spread.
    pub fn is_settled(&self) -> bool {
        self.buf.len() >= STABLE_FILL
    }

    /// Max minus min over the held samples, or `None` until settled.
    pub fn span(&self) -> Option<f64> {
        if !self.is_settled() {
            return None;
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &x in &self.buf {
            min = min.min(x);
            max = max.max(x);
        }
        Some(max - min)
    }

    /// Population standard deviation of the held samples.
    pub fn std_dev(&self) -> Option<f64> {
        if self.buf.is_empty() {
            return None;
        }
        let n = self.buf.len() as f64;
        let mean = self.buf.iter().sum::<f64>() / n;
        let var = self.buf.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        Some(var.sqrt())
    }
}

impl Default for Ring {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_waits_for_settle() {
        let mut r = Ring::new();
        for i in 0..STABLE_FILL - 1 {
            r.push(i as f64);
            assert_eq!(r.span(), None);
        }
        r.push(100.0);
        assert_eq!(r.span(), Some(100.0));
    }

    #[test]
    fn old_samples_roll_off() {
        let mut r = Ring::new();
        r.push(1_000.0);
        for _ in 0..CAPACITY {
            r.push(5.0);
        }
        assert_eq!(r.len(), CAPACITY);
        assert_eq!(r.span(), Some(0.0));
        assert_eq!(r.last(), Some(5.0));
    }

    #[test]
    fn std_dev_of_constant_is_zero() {
        let mut r = Ring::new();
        for _ in 0..4 {
            r.push(2.5);
        }
        assert_eq!(r.std_dev(), Some(0.0));
    }
}
