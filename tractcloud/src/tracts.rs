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

//! # Compact tracts
//! A compact tract is the tractogram of a seed voxel or merged cluster restricted to
//! the white-matter target mask, so it's a plain dense vector. Two representations
//! exist: `CompactTract` holds f32 values (natural units are directly averageable,
//! log units are what distances are computed on) and `CompactTractChar` holds the
//! byte-compressed log-unit form used for leaf storage.
//!
//! Each tract carries its cached norm plus the `in_log` and `thresholded` flags.
//! Thresholding invalidates the norm; using a tract with a stale norm is a
//! precondition violation, not a silent wrong answer.

use crate::distances::{NormalizedDot, TractMetric};
use crate::errors::{TractCloudError, TractCloudResult};

const MEGABYTE: f64 = (1024 * 1024) as f64;

/// Dense tractogram in f32, either in natural or in log units.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactTract {
    values: Vec<f32>,
    norm: f64,
    norm_ready: bool,
    in_log: bool,
    thresholded: bool,
}

/// Dense tractogram compressed to one byte per target-mask voxel.
/// Byte values encode log-unit intensities scaled to [0, 255].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactTractChar {
    values: Vec<u8>,
    norm: f64,
    norm_ready: bool,
    thresholded: bool,
}

impl CompactTract {
    /// A tract in natural units, fresh from averaging or unlogging. Norm is not computed.
    pub fn new(values: Vec<f32>) -> CompactTract {
        CompactTract {
            values,
            norm: 0.0,
            norm_ready: false,
            in_log: false,
            thresholded: false,
        }
    }

    /// A tract whose values are already in log units (the form leaf stores hold).
    pub fn from_log_units(values: Vec<f32>) -> CompactTract {
        CompactTract {
            values,
            norm: 0.0,
            norm_ready: false,
            in_log: true,
            thresholded: false,
        }
    }

    /// Expands a byte tract into f32, keeping its flags and norm.
    pub fn from_char(tract: &CompactTractChar) -> CompactTract {
        CompactTract {
            values: tract.values.iter().map(|v| *v as f32 / 255.0).collect(),
            norm: tract.norm / 255.0,
            norm_ready: tract.norm_ready,
            in_log: true,
            thresholded: tract.thresholded,
        }
    }

    /// Number of target-mask voxels covered
    pub fn len(&self) -> usize {
        self.values.len()
    }

    ///
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    ///
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Memory footprint in MB, used to size the caches at startup
    pub fn mbytes(&self) -> f64 {
        (self.values.len() * std::mem::size_of::<f32>()) as f64 / MEGABYTE
    }

    /// True when the values are in log units
    pub fn is_log(&self) -> bool {
        self.in_log
    }

    /// True when a threshold has been applied
    pub fn is_thresholded(&self) -> bool {
        self.thresholded
    }

    /// The cached norm. Only meaningful after `compute_norm` or `set_norm`.
    pub fn norm(&self) -> f64 {
        self.norm
    }

    ///
    pub fn norm_ready(&self) -> bool {
        self.norm_ready
    }

    pub(crate) fn restore_flags(&mut self, in_log: bool, thresholded: bool) {
        self.in_log = in_log;
        self.thresholded = thresholded;
    }

    /// Zeroes every entry below the relative cutoff and invalidates the cached norm.
    /// A cutoff of zero or less leaves the tract untouched.
    pub fn threshold(&mut self, cutoff: f32) {
        if cutoff <= 0.0 {
            return;
        }
        for v in self.values.iter_mut() {
            if *v < cutoff {
                *v = 0.0;
            }
        }
        self.thresholded = true;
        self.norm_ready = false;
    }

    /// Applies the log transform `log10(1 + x*(10^L - 1)) / L` elementwise.
    /// A log factor of zero means natural-unit operation and is a no-op.
    pub fn do_log(&mut self, log_factor: f32) -> TractCloudResult<()> {
        if log_factor == 0.0 {
            return Ok(());
        }
        if self.in_log {
            return Err(TractCloudError::PreconditionViolated(
                "do_log() on a tract already in log units",
            ));
        }
        let factor = log_factor as f64;
        let pow = 10f64.powf(factor) - 1.0;
        for v in self.values.iter_mut() {
            *v = ((1.0 + (*v as f64) * pow).log10() / factor) as f32;
        }
        self.in_log = true;
        self.norm_ready = false;
        Ok(())
    }

    /// Inverts `do_log`, recovering natural units.
    pub fn un_log(&mut self, log_factor: f32) -> TractCloudResult<()> {
        if log_factor == 0.0 {
            return Ok(());
        }
        if !self.in_log {
            return Err(TractCloudError::PreconditionViolated(
                "un_log() on a tract not in log units",
            ));
        }
        let factor = log_factor as f64;
        let pow = 10f64.powf(factor) - 1.0;
        for v in self.values.iter_mut() {
            *v = ((10f64.powf((*v as f64) * factor) - 1.0) / pow) as f32;
        }
        self.in_log = false;
        self.norm_ready = false;
        Ok(())
    }

    /// Recomputes and caches the norm
    pub fn compute_norm(&mut self) -> f64 {
        self.norm = NormalizedDot::norm(&self.values);
        self.norm_ready = true;
        self.norm
    }

    /// Installs a norm computed elsewhere (the initializer precomputes all leaf norms)
    pub fn set_norm(&mut self, norm: f64) {
        self.norm = norm;
        self.norm_ready = true;
    }

    /// Dissimilarity against another f32 tract in the same representation
    pub fn tract_distance(&self, other: &CompactTract) -> TractCloudResult<f32> {
        if self.in_log != other.in_log {
            return Err(TractCloudError::PreconditionViolated(
                "tract_distance() between natural and log units",
            ));
        }
        self.check_comparable(other.values.len(), other.norm_ready)?;
        let dot = NormalizedDot::dot(&self.values, &other.values);
        Ok(NormalizedDot::dissimilarity(dot, self.norm, other.norm))
    }

    /// Dissimilarity against a byte tract. The metric is scale invariant, so the
    /// byte scaling cancels; byte tracts carry whatever representation their store
    /// holds, keeping it aligned with this tract's is on the caller.
    pub fn tract_distance_char(&self, other: &CompactTractChar) -> TractCloudResult<f32> {
        self.check_comparable(other.values.len(), other.norm_ready)?;
        let dot = NormalizedDot::dot(&self.values, &other.values);
        Ok(NormalizedDot::dissimilarity(dot, self.norm, other.norm))
    }

    fn check_comparable(&self, other_len: usize, other_norm_ready: bool) -> TractCloudResult<()> {
        if self.values.is_empty() || other_len == 0 {
            return Err(TractCloudError::PreconditionViolated(
                "tract_distance() on an empty tract",
            ));
        }
        if self.values.len() != other_len {
            return Err(TractCloudError::PreconditionViolated(
                "tract_distance() between tracts of different target masks",
            ));
        }
        if !self.norm_ready || !other_norm_ready {
            return Err(TractCloudError::PreconditionViolated(
                "tract_distance() with a stale norm, recompute after thresholding",
            ));
        }
        Ok(())
    }

    /// Probability-mass preserving weighted average `(sa*a + sb*b) / (sa+sb)`.
    /// Both inputs must be natural-unit and unthresholded; the result's flags
    /// are cleared and its norm left uncomputed, the caller re-logs and thresholds.
    pub fn merged(
        a: &CompactTract,
        b: &CompactTract,
        size_a: usize,
        size_b: usize,
    ) -> TractCloudResult<CompactTract> {
        if a.in_log || b.in_log {
            return Err(TractCloudError::PreconditionViolated(
                "merged() requires natural-units tracts",
            ));
        }
        if a.thresholded || b.thresholded {
            return Err(TractCloudError::PreconditionViolated(
                "merged() requires unthresholded tracts",
            ));
        }
        if a.values.len() != b.values.len() {
            return Err(TractCloudError::PreconditionViolated(
                "merged() between tracts of different target masks",
            ));
        }
        let wa = size_a as f64;
        let wb = size_b as f64;
        let wsum = wa + wb;
        let values = a
            .values
            .iter()
            .zip(&b.values)
            .map(|(va, vb)| ((*va as f64 * wa + *vb as f64 * wb) / wsum) as f32)
            .collect();
        Ok(CompactTract::new(values))
    }
}

impl CompactTractChar {
    /// A byte tract fresh from a leaf store, values in scaled log units.
    pub fn new(values: Vec<u8>) -> CompactTractChar {
        CompactTractChar {
            values,
            norm: 0.0,
            norm_ready: false,
            thresholded: false,
        }
    }

    /// Quantizes an f32 log-unit tract to bytes. Values are clamped to [0,1] first.
    pub fn from_float(tract: &CompactTract) -> CompactTractChar {
        let values = tract
            .values
            .iter()
            .map(|v| (v.max(0.0).min(1.0) * 255.0).round() as u8)
            .collect();
        CompactTractChar {
            values,
            norm: 0.0,
            norm_ready: false,
            thresholded: tract.thresholded,
        }
    }

    /// Number of target-mask voxels covered
    pub fn len(&self) -> usize {
        self.values.len()
    }

    ///
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    ///
    pub fn values(&self) -> &[u8] {
        &self.values
    }

    /// Memory footprint in MB, used to size the caches at startup
    pub fn mbytes(&self) -> f64 {
        self.values.len() as f64 / MEGABYTE
    }

    ///
    pub fn is_thresholded(&self) -> bool {
        self.thresholded
    }

    /// The cached norm, in byte scale. Only meaningful after `compute_norm` or `set_norm`.
    pub fn norm(&self) -> f64 {
        self.norm
    }

    ///
    pub fn norm_ready(&self) -> bool {
        self.norm_ready
    }

    pub(crate) fn restore_flags(&mut self, thresholded: bool) {
        self.thresholded = thresholded;
    }

    /// Zeroes every entry whose normalized value falls below the relative cutoff
    /// and invalidates the cached norm.
    pub fn threshold(&mut self, cutoff: f32) {
        if cutoff <= 0.0 {
            return;
        }
        let byte_cutoff = (cutoff * 255.0).ceil() as u8;
        for v in self.values.iter_mut() {
            if *v < byte_cutoff {
                *v = 0;
            }
        }
        self.thresholded = true;
        self.norm_ready = false;
    }

    /// Recomputes and caches the norm (in byte scale)
    pub fn compute_norm(&mut self) -> f64 {
        self.norm = NormalizedDot::norm(&self.values);
        self.norm_ready = true;
        self.norm
    }

    /// Installs a norm computed elsewhere
    pub fn set_norm(&mut self, norm: f64) {
        self.norm = norm;
        self.norm_ready = true;
    }

    /// Dissimilarity against another byte tract
    pub fn tract_distance(&self, other: &CompactTractChar) -> TractCloudResult<f32> {
        if self.values.is_empty() || other.values.is_empty() {
            return Err(TractCloudError::PreconditionViolated(
                "tract_distance() on an empty tract",
            ));
        }
        if self.values.len() != other.values.len() {
            return Err(TractCloudError::PreconditionViolated(
                "tract_distance() between tracts of different target masks",
            ));
        }
        if !self.norm_ready || !other.norm_ready {
            return Err(TractCloudError::PreconditionViolated(
                "tract_distance() with a stale norm, recompute after thresholding",
            ));
        }
        let dot = NormalizedDot::dot(&self.values, &other.values);
        Ok(NormalizedDot::dissimilarity(dot, self.norm, other.norm))
    }

    /// Dissimilarity against an f32 log-unit tract
    pub fn tract_distance_float(&self, other: &CompactTract) -> TractCloudResult<f32> {
        other.tract_distance_char(self)
    }

    /// Dissimilarities against a batch of byte tracts, parallelized for the
    /// neighbor scans of the initializer.
    pub fn distances_to_batch(
        &self,
        others: &[&CompactTractChar],
    ) -> TractCloudResult<Vec<f32>> {
        use rayon::prelude::*;
        others
            .par_iter()
            .map(|other| self.tract_distance(other))
            .collect()
    }
}
