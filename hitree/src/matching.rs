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

//! # The cross-tree matcher
//! Greedy one-to-one matching of base nodes (meta-leaves) across two trees built
//! over different datasets warped to a common space. The dissimilarity matrix
//! over mean tracts is computed once (or loaded from disk); matching repeatedly
//! takes the global minimum, subject to a euclidean limit between cluster
//! centers; whatever stays unmatched is pruned from its tree so both end with
//! identical base-node counts.

use crate::errors::{HitreeError, HitreeResult};
use crate::processing::TreeProcesser;
use crate::tree::{HcTree, INVALID_INDEX};
use crate::ClusterId;
use hashbrown::HashMap;
use ndarray::Array2;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tractcloud::{read_dist_matrix, write_dist_matrix, TractStore};

/// Entries blanked out of the working matrix during matching
const MATCHED_OUT: f32 = 2.0;
/// The sentinel for a base node that found no partner
const NO_MATCH: usize = INVALID_INDEX;

fn euclid(a: (f32, f32, f32), b: (f32, f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    let dz = a.2 - b.2;
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Matching quality summary over a finished correspondence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchRating {
    /// Pearson correlation of matched cluster sizes
    pub size_correlation: f64,
    /// Mean tract distance over the matches
    pub mean_match_distance: f64,
    /// Size-weighted tract distance, the matching quality figure
    pub weighted_match_distance: f64,
    /// Fraction of the original leaves that ended up matched
    pub fraction_matched: f64,
    /// Mean euclidean distance between matched cluster centers
    pub mean_euclidean_distance: f64,
    /// Size-weighted euclidean distance between matched cluster centers
    pub weighted_euclidean_distance: f64,
}

/// Matches base nodes across two trees and carries the state the comparison
/// statistics run on. Both trees are owned mutably for the duration: matching
/// prunes them, the noise baseline flattens them.
pub struct TreeMatcher<'a> {
    pub(crate) tree1: &'a mut HcTree,
    pub(crate) tree2: &'a mut HcTree,
    store1: Arc<dyn TractStore>,
    store2: Arc<dyn TractStore>,
    max_phys_dist: f32,
    threshold1: f32,
    threshold2: f32,
    verbose: bool,
    pub(crate) base_nodes1: Vec<usize>,
    pub(crate) base_nodes2: Vec<usize>,
    pub(crate) base_coords1: Vec<(f32, f32, f32)>,
    pub(crate) base_coords2: Vec<(f32, f32, f32)>,
    pub(crate) initial_sizes: (usize, usize),
    pub(crate) dist_matrix: Array2<f32>,
    pub(crate) correspondence: Vec<usize>,
    pub(crate) corresp_reverse: Vec<usize>,
    pub(crate) corresp_distances: Vec<(f32, f32)>,
    pub(crate) full_correspondence: Vec<usize>,
    pub(crate) noise_levels1: Vec<f32>,
    pub(crate) noise_levels2: Vec<f32>,
    real_base_nodes: bool,
}

impl<'a> TreeMatcher<'a> {
    /// A matcher over two trees and the stores holding their base-node mean
    /// tracts, already warped to a common space
    pub fn new(
        tree1: &'a mut HcTree,
        tree2: &'a mut HcTree,
        store1: Arc<dyn TractStore>,
        store2: Arc<dyn TractStore>,
    ) -> TreeMatcher<'a> {
        let initial_sizes = (tree1.num_leaves(), tree2.num_leaves());
        TreeMatcher {
            tree1,
            tree2,
            store1,
            store2,
            max_phys_dist: 0.0,
            threshold1: 0.0,
            threshold2: 0.0,
            verbose: false,
            base_nodes1: Vec::new(),
            base_nodes2: Vec::new(),
            base_coords1: Vec::new(),
            base_coords2: Vec::new(),
            initial_sizes,
            dist_matrix: Array2::zeros((0, 0)),
            correspondence: Vec::new(),
            corresp_reverse: Vec::new(),
            corresp_distances: Vec::new(),
            full_correspondence: Vec::new(),
            noise_levels1: Vec::new(),
            noise_levels2: Vec::new(),
            real_base_nodes: false,
        }
    }

    /// Maximum euclidean distance between matched cluster centers; zero disables
    /// the restriction
    pub fn set_max_phys_dist(&mut self, max_phys_dist: f32) -> &mut Self {
        self.max_phys_dist = max_phys_dist.max(0.0);
        self
    }

    ///
    pub fn set_verbose(&mut self, verbose: bool) -> &mut Self {
        self.verbose = verbose;
        self
    }

    /// Relative threshold applied to mean tracts before dissimilarity, converted
    /// to each tree's log units. When exactly one tree carries a log factor the
    /// nonzero one is used for both sides, with a warning.
    pub fn set_relative_threshold(&mut self, ratio: f32) {
        if ratio <= 0.0 || ratio >= 1.0 {
            if ratio != 0.0 {
                log::warn!("relative threshold {} out of [0,1), using 0", ratio);
            }
            self.threshold1 = 0.0;
            self.threshold2 = 0.0;
            return;
        }
        let mut factor1 = self.tree1.log_factor;
        let mut factor2 = self.tree2.log_factor;
        let mut streams1 = self.tree1.num_streamlines;
        let mut streams2 = self.tree2.num_streamlines;
        if (factor1 == 0.0) != (factor2 == 0.0) {
            // one side carries no log normalization: use the nonzero side unchanged
            let nonzero = if factor1 == 0.0 { factor2 } else { factor1 };
            let streams = streams1.max(streams2);
            log::warn!(
                "one tree has no log factor, thresholding both with factor {}",
                nonzero
            );
            factor1 = nonzero;
            factor2 = nonzero;
            streams1 = streams;
            streams2 = streams;
        }
        self.threshold1 = if factor1 == 0.0 {
            ratio
        } else {
            (streams1 as f32 * ratio).log10() / factor1
        };
        self.threshold2 = if factor2 == 0.0 {
            ratio
        } else {
            (streams2 as f32 * ratio).log10() / factor2
        };
    }

    /// True when both trees expose valid meta-leaves (every leaf hangs from a
    /// base node)
    pub fn are_real_base_nodes(&self) -> bool {
        self.real_base_nodes
    }

    ///
    pub fn base_nodes(&self) -> (&[usize], &[usize]) {
        (&self.base_nodes1, &self.base_nodes2)
    }

    ///
    pub fn correspondence(&self) -> &[usize] {
        &self.correspondence
    }

    ///
    pub fn dist_matrix(&self) -> &Array2<f32> {
        &self.dist_matrix
    }

    /// Reloads the base-node lists (and their mean coordinates when asked) from
    /// the trees as they currently stand
    pub fn fetch_base_nodes(&mut self, with_coords: bool) -> HitreeResult<bool> {
        self.base_nodes1 = self.tree1.root_base_nodes()?;
        self.base_nodes2 = self.tree2.root_base_nodes()?;
        self.real_base_nodes =
            self.tree1.is_base_node_tree() && self.tree2.is_base_node_tree();
        if with_coords {
            self.base_coords1 = self
                .base_nodes1
                .iter()
                .map(|base| self.tree1.mean_coordinate(ClusterId::node(*base)))
                .collect::<HitreeResult<_>>()?;
            self.base_coords2 = self
                .base_nodes2
                .iter()
                .map(|base| self.tree2.mean_coordinate(ClusterId::node(*base)))
                .collect::<HitreeResult<_>>()?;
        }
        Ok(self.real_base_nodes)
    }

    /// Computes the full cross-tree dissimilarity matrix over base-node mean
    /// tracts. Pairs whose cluster centers sit further apart than the euclidean
    /// limit stay at the maximum value 1.
    pub fn base_distance_matrix(&mut self) -> HitreeResult<()> {
        self.fetch_base_nodes(true)?;
        if self.base_nodes1.is_empty() || self.base_nodes2.is_empty() {
            return Err(HitreeError::Precondition(
                "one of the trees has no base nodes",
            ));
        }
        let threshold1 = self.threshold1;
        let threshold2 = self.threshold2;
        let max_phys_dist = self.max_phys_dist;
        let store1 = &self.store1;
        let store2 = &self.store2;
        let base_nodes2 = &self.base_nodes2;
        let base_coords2 = &self.base_coords2;
        let rows: Vec<Vec<f32>> = self
            .base_nodes1
            .par_iter()
            .zip(&self.base_coords1)
            .map(|(base1, coord1)| -> HitreeResult<Vec<f32>> {
                let mut tract1 = store1.read_node_tract(*base1)?;
                tract1.threshold(threshold1);
                tract1.compute_norm();
                let mut row = vec![1.0f32; base_nodes2.len()];
                for (column, (base2, coord2)) in
                    base_nodes2.iter().zip(base_coords2).enumerate()
                {
                    if max_phys_dist > 0.0 && euclid(*coord1, *coord2) > max_phys_dist {
                        continue;
                    }
                    let mut tract2 = store2.read_node_tract(*base2)?;
                    tract2.threshold(threshold2);
                    tract2.compute_norm();
                    row[column] = tract1.tract_distance(&tract2)?;
                }
                Ok(row)
            })
            .collect::<HitreeResult<_>>()?;
        let mut matrix = Array2::from_elem((self.base_nodes1.len(), self.base_nodes2.len()), 1.0);
        for (row_index, row) in rows.into_iter().enumerate() {
            for (column, value) in row.into_iter().enumerate() {
                matrix[(row_index, column)] = value;
            }
        }
        self.dist_matrix = matrix;
        if self.verbose {
            println!(
                "{}x{} base distance matrix computed",
                self.base_nodes1.len(),
                self.base_nodes2.len()
            );
        }
        Ok(())
    }

    /// Saves the dissimilarity matrix container
    pub fn write_matrix<P: AsRef<Path>>(&self, path: P) -> HitreeResult<()> {
        write_dist_matrix(path, &self.dist_matrix, true)?;
        Ok(())
    }

    /// Loads a previously saved dissimilarity matrix, checking it against the
    /// current base-node vectors
    pub fn read_matrix<P: AsRef<Path>>(&mut self, path: P) -> HitreeResult<()> {
        if self.base_nodes1.is_empty() {
            self.fetch_base_nodes(true)?;
        }
        let matrix = read_dist_matrix(path)?;
        if matrix.nrows() != self.base_nodes1.len() || matrix.ncols() != self.base_nodes2.len() {
            return Err(HitreeError::Precondition(
                "distance matrix dimensions do not match the base-node vectors",
            ));
        }
        self.dist_matrix = matrix;
        Ok(())
    }

    /// Greedy one-to-one matching: repeatedly take the smallest unmatched entry
    /// until it exceeds the threshold (clamped into [0.1, 1]), then prune whatever
    /// stayed unmatched from its tree and rebuild the correspondence over the
    /// compacted ids.
    pub fn greedy_correspondence(&mut self, dissim_threshold: f32) -> HitreeResult<()> {
        let threshold = dissim_threshold.max(0.1).min(1.0);
        if self.base_nodes1.is_empty() || self.base_nodes2.is_empty() {
            self.fetch_base_nodes(true)?;
        }
        if self.base_coords1.len() != self.base_nodes1.len()
            || self.base_coords2.len() != self.base_nodes2.len()
        {
            self.fetch_base_nodes(true)?;
        }
        if self.dist_matrix.nrows() != self.base_nodes1.len()
            || self.dist_matrix.ncols() != self.base_nodes2.len()
        {
            return Err(HitreeError::Precondition(
                "base distance matrix is missing or stale",
            ));
        }
        if self.verbose {
            println!("Computing base-node matching by greedy correspondence");
        }

        let mut working = self.dist_matrix.clone();
        let mut proto_correspondence = vec![NO_MATCH; self.base_nodes1.len()];
        let mut matched1 = vec![false; self.base_nodes1.len()];
        let mut matched2 = vec![false; self.base_nodes2.len()];

        loop {
            // global minimum, first hit in row-major order wins
            let mut best = MATCHED_OUT;
            let mut best_pos = (0usize, 0usize);
            for (position, value) in working.indexed_iter() {
                if *value < best {
                    best = *value;
                    best_pos = position;
                }
            }
            if best > threshold {
                break;
            }
            let (row, column) = best_pos;
            proto_correspondence[row] = column;
            matched1[row] = true;
            matched2[column] = true;
            for value in working.row_mut(row) {
                *value = MATCHED_OUT;
            }
            for value in working.column_mut(column) {
                *value = MATCHED_OUT;
            }
        }

        self.full_correspondence = proto_correspondence.clone();
        self.finish_correspondence(proto_correspondence, &matched1, &matched2)
    }

    /// A baseline matching that pairs base nodes uniformly at random within the
    /// euclidean restriction, to measure how much signal the real matching carries
    pub fn random_correspondence(&mut self, seed: u64) -> HitreeResult<()> {
        if self.base_nodes1.is_empty()
            || self.base_coords1.is_empty()
            || self.base_nodes2.is_empty()
            || self.base_coords2.is_empty()
        {
            self.fetch_base_nodes(true)?;
        }
        if self.dist_matrix.nrows() != self.base_nodes1.len()
            || self.dist_matrix.ncols() != self.base_nodes2.len()
        {
            return Err(HitreeError::Precondition(
                "base distance matrix is missing or stale",
            ));
        }
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut proto_correspondence = vec![NO_MATCH; self.base_nodes1.len()];
        let mut matched1 = vec![false; self.base_nodes1.len()];
        let mut matched2 = vec![false; self.base_nodes2.len()];
        let mut available: Vec<usize> = (0..self.base_nodes2.len()).collect();

        for row in 0..self.base_nodes1.len() {
            let candidates: Vec<usize> = available
                .iter()
                .enumerate()
                .filter(|(_, column)| {
                    self.max_phys_dist == 0.0
                        || euclid(self.base_coords1[row], self.base_coords2[**column])
                            <= self.max_phys_dist
                })
                .map(|(position, _)| position)
                .collect();
            if candidates.is_empty() {
                continue;
            }
            let chosen = candidates[rng.gen_range(0..candidates.len())];
            let column = available.remove(chosen);
            proto_correspondence[row] = column;
            matched1[row] = true;
            matched2[column] = true;
        }

        self.full_correspondence = proto_correspondence.clone();
        self.finish_correspondence(proto_correspondence, &matched1, &matched2)
    }

    /// Prunes unmatched base nodes, compacts ids and rebuilds the relative
    /// correspondence tables, their reverse, and the per-match distances
    fn finish_correspondence(
        &mut self,
        proto_correspondence: Vec<usize>,
        matched1: &[bool],
        matched2: &[bool],
    ) -> HitreeResult<()> {
        let old_base_nodes1 = self.base_nodes1.clone();
        let old_base_nodes2 = self.base_nodes2.clone();
        let old_coords1 = self.base_coords1.clone();
        let old_coords2 = self.base_coords2.clone();

        let unmatched1: Vec<usize> = old_base_nodes1
            .iter()
            .enumerate()
            .filter(|(relative, _)| !matched1[*relative])
            .map(|(_, base)| *base)
            .collect();
        let unmatched2: Vec<usize> = old_base_nodes2
            .iter()
            .enumerate()
            .filter(|(relative, _)| !matched2[*relative])
            .map(|(_, base)| *base)
            .collect();

        let node_lookup1 = prune_bases(self.tree1, &unmatched1, self.verbose, "tree1")?;
        let node_lookup2 = prune_bases(self.tree2, &unmatched2, self.verbose, "tree2")?;
        self.fetch_base_nodes(true)?;

        if self.base_nodes1.len() != self.base_nodes2.len() {
            return Err(HitreeError::Corruption(format!(
                "matched trees ended with {} and {} base nodes",
                self.base_nodes1.len(),
                self.base_nodes2.len()
            )));
        }

        let new_relative1: HashMap<usize, usize> = self
            .base_nodes1
            .iter()
            .enumerate()
            .map(|(relative, base)| (*base, relative))
            .collect();
        let new_relative2: HashMap<usize, usize> = self
            .base_nodes2
            .iter()
            .enumerate()
            .map(|(relative, base)| (*base, relative))
            .collect();

        let matched_count = self.base_nodes1.len();
        let mut correspondence = vec![NO_MATCH; matched_count];
        let mut distances = vec![(MATCHED_OUT, 0.0f32); matched_count];
        for (old_rel1, old_rel2) in proto_correspondence.iter().enumerate() {
            if *old_rel2 == NO_MATCH {
                continue;
            }
            let new_abs1 = node_lookup1[old_base_nodes1[old_rel1]];
            let new_abs2 = node_lookup2[old_base_nodes2[*old_rel2]];
            if new_abs1 == INVALID_INDEX || new_abs2 == INVALID_INDEX {
                continue;
            }
            let new_rel1 = *new_relative1.get(&new_abs1).ok_or_else(|| {
                HitreeError::Corruption(format!(
                    "matched node {} is no longer a base node",
                    new_abs1
                ))
            })?;
            let new_rel2 = *new_relative2.get(&new_abs2).ok_or_else(|| {
                HitreeError::Corruption(format!(
                    "matched node {} is no longer a base node",
                    new_abs2
                ))
            })?;
            correspondence[new_rel1] = new_rel2;
            distances[new_rel1] = (
                self.dist_matrix[(old_rel1, *old_rel2)],
                euclid(old_coords1[old_rel1], old_coords2[*old_rel2]),
            );
        }
        if correspondence.contains(&NO_MATCH) {
            return Err(HitreeError::Corruption(
                "correspondence table has holes after pruning".to_string(),
            ));
        }

        // crop the stored matrix to the matched rows and columns
        let mut cropped = Array2::from_elem((matched_count, matched_count), 1.0f32);
        let mut row_out = 0;
        for (old_rel1, was_matched) in matched1.iter().enumerate() {
            if !was_matched {
                continue;
            }
            let mut column_out = 0;
            for (old_rel2, was_matched2) in matched2.iter().enumerate() {
                if !was_matched2 {
                    continue;
                }
                cropped[(row_out, column_out)] = self.dist_matrix[(old_rel1, old_rel2)];
                column_out += 1;
            }
            row_out += 1;
        }
        self.dist_matrix = cropped;

        let mut reverse = vec![NO_MATCH; correspondence.len()];
        for (relative1, relative2) in correspondence.iter().enumerate() {
            reverse[*relative2] = relative1;
        }
        self.correspondence = correspondence;
        self.corresp_reverse = reverse;
        self.corresp_distances = distances;
        Ok(())
    }

    /// Quality figures over the finished correspondence
    pub fn rate_correspondence(&self) -> HitreeResult<MatchRating> {
        if self.correspondence.is_empty() {
            return Err(HitreeError::Precondition(
                "no correspondence to rate, run a matching first",
            ));
        }
        let mut size_correlation = stats_hitree::PearsonAccumulator::new();
        let mut size_sum = 0usize;
        let mut dist_sum = 0.0f64;
        let mut dist_weight_sum = 0.0f64;
        let mut phys_sum = 0.0f64;
        let mut phys_weight_sum = 0.0f64;
        for (relative1, relative2) in self.correspondence.iter().enumerate() {
            let size1 = self.tree1.nodes()[self.base_nodes1[relative1]].size();
            let size2 = self.tree2.nodes()[self.base_nodes2[*relative2]].size();
            let (tract_dist, phys_dist) = self.corresp_distances[relative1];
            size_correlation.add(size1 as f64, size2 as f64);
            size_sum += size1 + size2;
            dist_sum += tract_dist as f64;
            dist_weight_sum += tract_dist as f64 * (size1 + size2) as f64;
            phys_sum += phys_dist as f64;
            phys_weight_sum += phys_dist as f64 * (size1 + size2) as f64;
        }
        let count = self.correspondence.len() as f64;
        Ok(MatchRating {
            size_correlation: size_correlation.correlation().unwrap_or(0.0),
            mean_match_distance: dist_sum / count,
            weighted_match_distance: dist_weight_sum / size_sum as f64,
            fraction_matched: size_sum as f64
                / (self.initial_sizes.0 + self.initial_sizes.1) as f64,
            mean_euclidean_distance: phys_sum / count,
            weighted_euclidean_distance: phys_weight_sum / size_sum as f64,
        })
    }

    /// Writes the correspondence file: absolute node ids with their distances,
    /// then the same mapping in zero-based base-vector positions
    pub fn write_correspondence<P: AsRef<Path>>(&self, path: P) -> HitreeResult<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(
            writer,
            "# base-node correspondence {} <-> {}",
            self.tree1.tree_name, self.tree2.tree_name
        )?;
        writeln!(writer, "#correspondence")?;
        for (relative1, relative2) in self.correspondence.iter().enumerate() {
            let (tract_dist, phys_dist) = self.corresp_distances[relative1];
            writeln!(
                writer,
                "{} {} {} {}",
                self.base_nodes1[relative1], self.base_nodes2[*relative2], tract_dist, phys_dist
            )?;
        }
        writeln!(writer, "#relativecorresp")?;
        for (relative1, relative2) in self.correspondence.iter().enumerate() {
            writeln!(writer, "{} {}", relative1, relative2)?;
        }
        writeln!(writer, "#end")?;
        Ok(())
    }
}

/// Reads back the relative correspondence block of a correspondence file
pub fn read_correspondence<P: AsRef<Path>>(path: P) -> HitreeResult<Vec<usize>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut relative = Vec::new();
    let mut in_block = false;
    for (line_index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed == "#relativecorresp" {
            in_block = true;
            continue;
        }
        if trimmed.starts_with('#') {
            in_block = false;
            continue;
        }
        if !in_block || trimmed.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if tokens.len() != 2 {
            return Err(HitreeError::Corruption(format!(
                "line {}: expected two relative ids",
                line_index + 1
            )));
        }
        let position: usize = tokens[0].parse().map_err(|_| {
            HitreeError::Corruption(format!("line {}: bad relative id", line_index + 1))
        })?;
        let target: usize = tokens[1].parse().map_err(|_| {
            HitreeError::Corruption(format!("line {}: bad relative id", line_index + 1))
        })?;
        if position != relative.len() {
            return Err(HitreeError::Corruption(format!(
                "line {}: relative ids out of order",
                line_index + 1
            )));
        }
        relative.push(target);
    }
    Ok(relative)
}

/// Flags the leaves of the given base nodes and cleans the tree up, returning the
/// node id remap
fn prune_bases(
    tree: &mut HcTree,
    bases: &[usize],
    verbose: bool,
    label: &str,
) -> HitreeResult<Vec<usize>> {
    if bases.is_empty() {
        return Ok((0..tree.num_nodes()).collect());
    }
    if verbose {
        println!("Removing {} base nodes from {}", bases.len(), label);
    }
    let mut to_flag = Vec::new();
    for base in bases {
        to_flag.extend(tree.leaves_under(ClusterId::node(*base))?);
    }
    TreeProcesser::new(tree).flag_leaves(&to_flag)?;
    let report = tree.cleanup();
    Ok(report.node_lookup)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tree::tests::two_base_tree;
    use tractcloud::{CompactTract, RamTractStore};

    fn mean_store(tracts: Vec<Vec<f32>>, ids: &[usize]) -> Arc<RamTractStore> {
        let store = Arc::new(RamTractStore::new(vec![]));
        for (tract, id) in tracts.into_iter().zip(ids) {
            store
                .write_node_tract(*id, &CompactTract::from_log_units(tract))
                .unwrap();
        }
        store
    }

    #[test]
    fn greedy_matching_follows_the_matrix() {
        // spec scenario: all three pairs match under a threshold of 0.9
        let mut tree1 = three_base_tree();
        let mut tree2 = three_base_tree();
        let store = mean_store(vec![vec![1.0]], &[0]);
        let mut matcher = TreeMatcher::new(&mut tree1, &mut tree2, store.clone(), store);
        matcher.fetch_base_nodes(true).unwrap();
        matcher.dist_matrix = Array2::from_shape_vec(
            (3, 3),
            vec![0.2, 0.9, 0.95, 0.8, 0.1, 0.7, 0.95, 0.95, 0.85],
        )
        .unwrap();
        matcher.greedy_correspondence(0.9).unwrap();
        assert_eq!(matcher.correspondence(), &[0, 1, 2]);
        assert_eq!(matcher.corresp_distances[0].0, 0.2);
        assert_eq!(matcher.corresp_distances[1].0, 0.1);
        assert_eq!(matcher.corresp_distances[2].0, 0.85);
        assert_eq!(matcher.corresp_reverse, vec![0, 1, 2]);
    }

    #[test]
    fn unmatched_bases_are_pruned() {
        let mut tree1 = three_base_tree();
        let mut tree2 = two_base_tree();
        let store = mean_store(vec![vec![1.0]], &[0]);
        let mut matcher = TreeMatcher::new(&mut tree1, &mut tree2, store.clone(), store);
        matcher.fetch_base_nodes(true).unwrap();
        // base 1 of tree1 matches nothing within threshold
        matcher.dist_matrix =
            Array2::from_shape_vec((3, 2), vec![0.1, 0.8, 0.95, 0.99, 0.7, 0.2]).unwrap();
        matcher.greedy_correspondence(0.5).unwrap();
        assert_eq!(matcher.base_nodes1.len(), 2);
        assert_eq!(matcher.base_nodes2.len(), 2);
        assert_eq!(matcher.correspondence(), &[0, 1]);
        assert_eq!(matcher.dist_matrix.dim(), (2, 2));
        matcher.tree1.check().unwrap();
        matcher.tree2.check().unwrap();
    }

    #[test]
    fn random_matching_is_one_to_one() {
        let mut tree1 = three_base_tree();
        let mut tree2 = three_base_tree();
        let store = mean_store(vec![vec![1.0]], &[0]);
        let mut matcher = TreeMatcher::new(&mut tree1, &mut tree2, store.clone(), store);
        matcher.fetch_base_nodes(true).unwrap();
        matcher.dist_matrix = Array2::from_elem((3, 3), 0.5);
        matcher.random_correspondence(11).unwrap();
        let mut seen = matcher.correspondence.clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn matrix_roundtrip_through_file() {
        let dir = tempdir::TempDir::new("matcher").unwrap();
        let path = dir.path().join("dists.cdm");
        let mut tree1 = three_base_tree();
        let mut tree2 = three_base_tree();
        let store = mean_store(vec![vec![1.0]], &[0]);
        let mut matcher = TreeMatcher::new(&mut tree1, &mut tree2, store.clone(), store);
        matcher.fetch_base_nodes(true).unwrap();
        matcher.dist_matrix = Array2::from_elem((3, 3), 0.25);
        matcher.write_matrix(&path).unwrap();
        matcher.dist_matrix = Array2::zeros((0, 0));
        matcher.read_matrix(&path).unwrap();
        assert_eq!(matcher.dist_matrix.dim(), (3, 3));
        assert_eq!(matcher.dist_matrix[(1, 2)], 0.25);
    }

    #[test]
    fn correspondence_file_roundtrip() {
        let dir = tempdir::TempDir::new("matcher").unwrap();
        let path = dir.path().join("corresp.txt");
        let mut tree1 = three_base_tree();
        let mut tree2 = three_base_tree();
        let store = mean_store(vec![vec![1.0]], &[0]);
        let mut matcher = TreeMatcher::new(&mut tree1, &mut tree2, store.clone(), store);
        matcher.fetch_base_nodes(true).unwrap();
        matcher.dist_matrix = Array2::from_elem((3, 3), 0.3);
        matcher.greedy_correspondence(0.9).unwrap();
        matcher.write_correspondence(&path).unwrap();
        let relative = read_correspondence(&path).unwrap();
        assert_eq!(relative, matcher.correspondence);
    }

    /// Six leaves under three base nodes and a two-level top
    pub(crate) fn three_base_tree() -> HcTree {
        use crate::tree::{Leaf, Node};
        use smallvec::smallvec;
        use tractcloud::{GridDims, SeedCoord};
        let mut leaves: Vec<Leaf> = (0..6).map(Leaf::new).collect();
        let mut nodes = Vec::new();
        for base in 0..3 {
            let kids: smallvec::SmallVec<[ClusterId; 8]> = smallvec![
                ClusterId::leaf(2 * base),
                ClusterId::leaf(2 * base + 1)
            ];
            leaves[2 * base].parent = ClusterId::node(base);
            leaves[2 * base + 1].parent = ClusterId::node(base);
            nodes.push(Node::new(base, kids, 2, 0.1 * (base as f32 + 1.0), 1));
        }
        let kids: smallvec::SmallVec<[ClusterId; 8]> =
            smallvec![ClusterId::node(0), ClusterId::node(1)];
        nodes[0].parent = ClusterId::node(3);
        nodes[1].parent = ClusterId::node(3);
        nodes.push(Node::new(3, kids, 4, 0.6, 2));
        let kids: smallvec::SmallVec<[ClusterId; 8]> =
            smallvec![ClusterId::node(3), ClusterId::node(2)];
        nodes[3].parent = ClusterId::node(4);
        nodes[2].parent = ClusterId::node(4);
        nodes.push(Node::new(4, kids, 6, 0.9, 3));
        let coordinates = (0..6).map(|i| SeedCoord::new(i, 0, 0)).collect();
        HcTree::from_parts(
            "three".to_string(),
            "mni".to_string(),
            GridDims { x: 6, y: 1, z: 1 },
            0,
            0.0,
            leaves,
            nodes,
            coordinates,
            (0..6).collect(),
            Vec::new(),
        )
    }
}
