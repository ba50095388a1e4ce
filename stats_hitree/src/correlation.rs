//! Pearson correlation accumulators.
//!
//! The weighted form is the one the tree cophenetic statistic needs: each sample
//! carries its own weight on each side, the products are normalized by the summed
//! weight products rather than the sample count.

use serde::{Deserialize, Serialize};

/// Plain single-pass Pearson accumulator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PearsonAccumulator {
    count: f64,
    sum_x: f64,
    sum_y: f64,
    sq_x: f64,
    sq_y: f64,
    sum_prod: f64,
}

impl PearsonAccumulator {
    ///
    pub fn new() -> PearsonAccumulator {
        PearsonAccumulator::default()
    }

    /// Number of samples folded in so far
    pub fn count(&self) -> usize {
        self.count as usize
    }

    /// Folds one sample pair in
    pub fn add(&mut self, x: f64, y: f64) {
        self.count += 1.0;
        self.sum_x += x;
        self.sum_y += y;
        self.sq_x += x * x;
        self.sq_y += y * y;
        self.sum_prod += x * y;
    }

    /// Folds another accumulator in, so partial sums from parallel chunks combine
    pub fn merge(&mut self, other: &PearsonAccumulator) {
        self.count += other.count;
        self.sum_x += other.sum_x;
        self.sum_y += other.sum_y;
        self.sq_x += other.sq_x;
        self.sq_y += other.sq_y;
        self.sum_prod += other.sum_prod;
    }

    /// The correlation, or `None` when it is undefined (no samples, or one of the
    /// variables has zero variance).
    pub fn correlation(&self) -> Option<f64> {
        if self.count < 1.0 {
            return None;
        }
        let mean_x = self.sum_x / self.count;
        let mean_y = self.sum_y / self.count;
        let numerator = self.sum_prod / self.count - mean_x * mean_y;
        let denominator_x = self.sq_x / self.count - mean_x * mean_x;
        let denominator_y = self.sq_y / self.count - mean_y * mean_y;
        if denominator_x <= 0.0 || denominator_y <= 0.0 {
            return None;
        }
        Some(numerator / (denominator_x * denominator_y).sqrt())
    }
}

/// Pearson accumulator over weighted samples. A sample (x, y) with weights
/// (wx, wy) contributes x*wx and y*wy, and every normalization runs over the
/// matching weight sums instead of the count.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WeightedPearsonAccumulator {
    count: f64,
    w_sum_x: f64,
    w_sum_y: f64,
    w_sq_x: f64,
    w_sq_y: f64,
    w_sum_prod: f64,
    sum_wx: f64,
    sum_wy: f64,
    sum_sq_wx: f64,
    sum_sq_wy: f64,
    sum_w_prod: f64,
}

impl WeightedPearsonAccumulator {
    ///
    pub fn new() -> WeightedPearsonAccumulator {
        WeightedPearsonAccumulator::default()
    }

    /// Number of samples folded in so far
    pub fn count(&self) -> usize {
        self.count as usize
    }

    /// Folds one weighted sample pair in
    pub fn add(&mut self, x: f64, y: f64, weight_x: f64, weight_y: f64) {
        let wx = x * weight_x;
        let wy = y * weight_y;
        self.count += 1.0;
        self.w_sum_x += wx;
        self.w_sum_y += wy;
        self.w_sq_x += wx * wx;
        self.w_sq_y += wy * wy;
        self.w_sum_prod += wx * wy;
        self.sum_wx += weight_x;
        self.sum_wy += weight_y;
        self.sum_sq_wx += weight_x * weight_x;
        self.sum_sq_wy += weight_y * weight_y;
        self.sum_w_prod += weight_x * weight_y;
    }

    /// Folds another accumulator in
    pub fn merge(&mut self, other: &WeightedPearsonAccumulator) {
        self.count += other.count;
        self.w_sum_x += other.w_sum_x;
        self.w_sum_y += other.w_sum_y;
        self.w_sq_x += other.w_sq_x;
        self.w_sq_y += other.w_sq_y;
        self.w_sum_prod += other.w_sum_prod;
        self.sum_wx += other.sum_wx;
        self.sum_wy += other.sum_wy;
        self.sum_sq_wx += other.sum_sq_wx;
        self.sum_sq_wy += other.sum_sq_wy;
        self.sum_w_prod += other.sum_w_prod;
    }

    /// The weighted correlation, or `None` when it is undefined
    pub fn correlation(&self) -> Option<f64> {
        if self.count < 1.0 || self.sum_wx <= 0.0 || self.sum_wy <= 0.0 {
            return None;
        }
        let mean_x = self.w_sum_x / self.sum_wx;
        let mean_y = self.w_sum_y / self.sum_wy;
        let numerator = self.w_sum_prod / self.sum_w_prod - mean_x * mean_y;
        let denominator_x = self.w_sq_x / self.sum_sq_wx - mean_x * mean_x;
        let denominator_y = self.w_sq_y / self.sum_sq_wy - mean_y * mean_y;
        if denominator_x <= 0.0 || denominator_y <= 0.0 {
            return None;
        }
        Some(numerator / (denominator_x * denominator_y).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn perfect_correlation() {
        let mut acc = PearsonAccumulator::new();
        for i in 0..10 {
            acc.add(i as f64, 2.0 * i as f64 + 1.0);
        }
        assert_approx_eq!(acc.correlation().unwrap(), 1.0, 1e-10);
    }

    #[test]
    fn perfect_anticorrelation() {
        let mut acc = PearsonAccumulator::new();
        for i in 0..10 {
            acc.add(i as f64, -0.5 * i as f64);
        }
        assert_approx_eq!(acc.correlation().unwrap(), -1.0, 1e-10);
    }

    #[test]
    fn flat_variable_is_undefined() {
        let mut acc = PearsonAccumulator::new();
        for i in 0..10 {
            acc.add(i as f64, 3.0);
        }
        assert!(acc.correlation().is_none());
        assert!(PearsonAccumulator::new().correlation().is_none());
    }

    #[test]
    fn merge_equals_sequential() {
        let samples: Vec<(f64, f64)> = (0..20).map(|i| (i as f64, (i * i) as f64)).collect();
        let mut whole = PearsonAccumulator::new();
        for (x, y) in &samples {
            whole.add(*x, *y);
        }
        let mut left = PearsonAccumulator::new();
        let mut right = PearsonAccumulator::new();
        for (x, y) in &samples[..10] {
            left.add(*x, *y);
        }
        for (x, y) in &samples[10..] {
            right.add(*x, *y);
        }
        left.merge(&right);
        assert_approx_eq!(
            whole.correlation().unwrap(),
            left.correlation().unwrap(),
            1e-12
        );
    }

    #[test]
    fn unit_weights_match_plain() {
        let mut plain = PearsonAccumulator::new();
        let mut weighted = WeightedPearsonAccumulator::new();
        for i in 0..15 {
            let x = (i % 7) as f64;
            let y = (i % 5) as f64;
            plain.add(x, y);
            weighted.add(x, y, 1.0, 1.0);
        }
        assert_approx_eq!(
            plain.correlation().unwrap(),
            weighted.correlation().unwrap(),
            1e-12
        );
    }

    #[test]
    fn weighted_identical_trees() {
        let mut weighted = WeightedPearsonAccumulator::new();
        for i in 1..12 {
            let d = i as f64 / 12.0;
            let w = (i * 3 % 7 + 1) as f64;
            weighted.add(d, d, w, w);
        }
        assert_approx_eq!(weighted.correlation().unwrap(), 1.0, 1e-10);
    }
}
