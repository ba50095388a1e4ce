/*
* Licensed to Elasticsearch B.V. under one or more contributor
* license agreements. See the NOTICE file distributed with
* this work for additional information regarding copyright
* ownership. Elasticsearch B.V. licenses this file to you under
* the Apache License, Version 2.0 (the "License"); you may
* not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
*  http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing,
* software distributed under the License is distributed on an
* "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
* KIND, either express or implied.  See the License for the
* specific language governing permissions and limitations
* under the License.
*/

//! The supported tract dissimilarity
//!
//! Tracts live either as f32 vectors or as byte-compressed log-unit vectors, so the
//! kernels are generic over both element types. The dissimilarity is scale invariant,
//! which is what makes the mixed f32/u8 combinations valid without rescaling.

use num_traits::AsPrimitive;
use std::fmt::Debug;

/// The trait that enables a tract metric
pub trait TractMetric: 'static + Send + Sync + Debug + Clone {
    /// Accumulated product of two dense vectors, in f64 to keep the long sums stable
    fn dot<X, Y>(x: &[X], y: &[Y]) -> f64
    where
        X: AsPrimitive<f64>,
        Y: AsPrimitive<f64>;
    /// The norm, sqrt(dot(x,x))
    fn norm<X: AsPrimitive<f64>>(x: &[X]) -> f64;
    /// Combines a precomputed dot product and the two cached norms into the
    /// dissimilarity value. Must return 1 whenever either norm is not positive.
    fn dissimilarity(dot: f64, norm_x: f64, norm_y: f64) -> f32;
}

/// Normalized dot product dissimilarity: `1 - dot(x,y) / (|x|*|y|)`.
/// Zero on identical tracts up to scaling, one on orthogonal or empty tracts.
#[derive(Debug, Clone)]
pub struct NormalizedDot {}

impl TractMetric for NormalizedDot {
    #[inline]
    fn dot<X, Y>(x: &[X], y: &[Y]) -> f64
    where
        X: AsPrimitive<f64>,
        Y: AsPrimitive<f64>,
    {
        x.iter()
            .zip(y)
            .map(|(xi, yi)| xi.as_() * yi.as_())
            .fold(0.0, |acc, p| acc + p)
    }

    #[inline]
    fn norm<X: AsPrimitive<f64>>(x: &[X]) -> f64 {
        x.iter()
            .map(|xi| xi.as_() * xi.as_())
            .fold(0.0, |acc, s| acc + s)
            .sqrt()
    }

    #[inline]
    fn dissimilarity(dot: f64, norm_x: f64, norm_y: f64) -> f32 {
        if norm_x <= 0.0 || norm_y <= 0.0 {
            return 1.0;
        }
        let d = 1.0 - dot / (norm_x * norm_y);
        if d < 0.0 {
            0.0
        } else if d > 1.0 {
            1.0
        } else {
            d as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn dot_is_symmetric_over_types() {
        let x: Vec<f32> = vec![1.0, 2.0, 3.0];
        let y: Vec<u8> = vec![3, 2, 1];
        assert_approx_eq!(NormalizedDot::dot(&x, &y), 10.0);
        let y_f: Vec<f32> = y.iter().map(|v| *v as f32).collect();
        assert_approx_eq!(NormalizedDot::dot(&x, &y_f), NormalizedDot::dot(&y, &x));
    }

    #[test]
    fn zero_norm_is_maximal() {
        assert_eq!(NormalizedDot::dissimilarity(0.0, 0.0, 1.0), 1.0);
        assert_eq!(NormalizedDot::dissimilarity(0.0, 1.0, 0.0), 1.0);
    }

    #[test]
    fn identical_is_zero() {
        let x: Vec<f32> = vec![0.5, 0.25, 0.125];
        let n = NormalizedDot::norm(&x);
        let d = NormalizedDot::dissimilarity(NormalizedDot::dot(&x, &x), n, n);
        assert!(d.abs() < 1e-6, "self distance should be 0, got {}", d);
    }
}
