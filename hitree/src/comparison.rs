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

//! # Tree comparison statistics
//! The scalar figures two matched trees are compared by: the (size-weighted)
//! cophenetic correlation and the simple-triplets score, plus the matching-noise
//! baseline that strips structure finer than what the matching quality supports.
//!
//! Both statistics run base-node-wise over the matched meta-leaves; with no
//! matching in place they fall back to leaf-wise mode for trees built over the
//! same seeds.

use crate::errors::{HitreeError, HitreeResult};
use crate::matching::TreeMatcher;
use crate::tree::{HcTree, INVALID_INDEX};
use crate::ClusterId;
use hashbrown::HashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use stats_hitree::{binomial, strided_len, PearsonAccumulator, WeightedPearsonAccumulator};

/// What a cophenetic comparison reports
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcpccResult {
    /// Size-weighted tree cophenetic correlation
    pub tcpcc: f32,
    /// Plain cophenetic correlation
    pub scpcc: f32,
    /// Fraction of pairs that survived the matching-noise filter
    pub used_fraction: f32,
    /// Effective granularity `N^2 / (N^2 - 2*used_pairs)`
    pub effective_granularity: f32,
}

impl<'a> TreeMatcher<'a> {
    /// The cophenetic correlation over all pairs of corresponding base nodes
    /// (leaf-wise over equal-seed trees when no matching is in place). Pairs
    /// whose distance falls below either endpoint's noise level are skipped.
    /// Flat trees report zero correlation with a warning.
    pub fn tcpcc(&self) -> HitreeResult<TcpccResult> {
        let node_mode = !self.base_nodes1.is_empty();
        if node_mode {
            if self.base_nodes1.len() != self.base_nodes2.len() {
                return Err(HitreeError::Precondition(
                    "base node vectors have different sizes",
                ));
            }
            if self.base_nodes1.len() != self.correspondence.len() {
                return Err(HitreeError::Precondition(
                    "correspondence does not match the base node vectors",
                ));
            }
        } else if self.tree1.num_leaves() != self.tree2.num_leaves() {
            return Err(HitreeError::Precondition(
                "leaf-wise comparison needs trees over the same seeds",
            ));
        }
        if !self.noise_levels1.is_empty()
            && (self.noise_levels1.len() != self.base_nodes1.len()
                || self.noise_levels2.len() != self.base_nodes2.len())
        {
            return Err(HitreeError::Precondition(
                "noise level vectors do not match the base node vectors",
            ));
        }
        let count = if node_mode {
            self.correspondence.len()
        } else {
            self.tree1.num_leaves()
        };
        if count < 2 {
            return Err(HitreeError::Precondition(
                "comparison needs at least two elements",
            ));
        }

        let folded = (0..count - 1)
            .into_par_iter()
            .map(|i| -> HitreeResult<(PearsonAccumulator, WeightedPearsonAccumulator, usize)> {
                let mut plain = PearsonAccumulator::new();
                let mut weighted = WeightedPearsonAccumulator::new();
                let mut used = 0usize;
                for j in (i + 1)..count {
                    let (dist1, dist2, size1, size2) = if node_mode {
                        let a1 = ClusterId::node(self.base_nodes1[i]);
                        let b1 = ClusterId::node(self.base_nodes1[j]);
                        let a2 = ClusterId::node(self.base_nodes2[self.correspondence[i]]);
                        let b2 = ClusterId::node(self.base_nodes2[self.correspondence[j]]);
                        (
                            self.tree1.distance(a1, b1)?,
                            self.tree2.distance(a2, b2)?,
                            self.tree1.size_of(a1)? + self.tree1.size_of(b1)?,
                            self.tree2.size_of(a2)? + self.tree2.size_of(b2)?,
                        )
                    } else {
                        (
                            self.tree1.leaf_distance(i, j)?,
                            self.tree2.leaf_distance(i, j)?,
                            2,
                            2,
                        )
                    };
                    if !self.noise_levels1.is_empty()
                        && (dist1 <= self.noise_levels1[i] || dist1 <= self.noise_levels1[j])
                    {
                        continue;
                    }
                    if !self.noise_levels2.is_empty()
                        && (dist2 <= self.noise_levels2[self.correspondence[i]]
                            || dist2 <= self.noise_levels2[self.correspondence[j]])
                    {
                        continue;
                    }
                    plain.add(dist1 as f64, dist2 as f64);
                    weighted.add(dist1 as f64, dist2 as f64, size1 as f64, size2 as f64);
                    used += 1;
                }
                Ok((plain, weighted, used))
            })
            .collect::<HitreeResult<Vec<_>>>()?;

        let mut plain = PearsonAccumulator::new();
        let mut weighted = WeightedPearsonAccumulator::new();
        let mut used = 0usize;
        for (partial_plain, partial_weighted, partial_used) in &folded {
            plain.merge(partial_plain);
            weighted.merge(partial_weighted);
            used += partial_used;
        }

        let scpcc = match plain.correlation() {
            Some(value) => value as f32,
            None => {
                log::warn!("one of the trees is completely flat, correlation set to 0");
                0.0
            }
        };
        let tcpcc = weighted.correlation().map(|v| v as f32).unwrap_or(0.0);
        let total_pairs = (count * (count - 1) / 2) as f32;
        let n_squared = (count * count) as f32;
        Ok(TcpccResult {
            tcpcc,
            scpcc,
            used_fraction: used as f32 / total_pairs,
            effective_granularity: n_squared / (n_squared - 2.0 * used as f32),
        })
    }

    /// The simple-triplets score: the fraction of base-node triples whose
    /// topology agrees across the trees, plain and size-weighted. A stride
    /// subsamples the index set for tractability; the visited count is checked
    /// against `C(n/s, 3)`.
    pub fn simple_triplets(&self, sample_freq: usize) -> HitreeResult<(f32, f32)> {
        let node_mode = !self.base_nodes1.is_empty();
        if node_mode {
            if self.base_nodes1.len() != self.base_nodes2.len() {
                return Err(HitreeError::Precondition(
                    "base node vectors have different sizes",
                ));
            }
            if self.base_nodes1.len() != self.correspondence.len() {
                return Err(HitreeError::Precondition(
                    "correspondence does not match the base node vectors",
                ));
            }
        } else if self.tree1.num_leaves() != self.tree2.num_leaves() {
            return Err(HitreeError::Precondition(
                "leaf-wise comparison needs trees over the same seeds",
            ));
        }
        let stride = sample_freq.max(1);
        let full_count = if node_mode {
            self.correspondence.len()
        } else {
            self.tree1.num_leaves()
        };
        let count = strided_len(full_count, stride);
        if count / stride < 3 {
            return Err(HitreeError::Precondition(
                "triplet comparison needs at least three elements",
            ));
        }

        let starts: Vec<usize> = (0..count).step_by(stride).collect();
        let folded = starts
            .par_iter()
            .map(|i| -> HitreeResult<(u64, u64, u64, u64)> {
                let mut visited = 0u64;
                let mut agreed = 0u64;
                let mut size_sum = 0u64;
                let mut agreed_size_sum = 0u64;
                for j in ((i + stride)..count).step_by(stride) {
                    for k in ((j + stride)..count).step_by(stride) {
                        let (order1, order2, size_element) = if node_mode {
                            let a1 = ClusterId::node(self.base_nodes1[*i]);
                            let b1 = ClusterId::node(self.base_nodes1[j]);
                            let c1 = ClusterId::node(self.base_nodes1[k]);
                            let a2 =
                                ClusterId::node(self.base_nodes2[self.correspondence[*i]]);
                            let b2 =
                                ClusterId::node(self.base_nodes2[self.correspondence[j]]);
                            let c2 =
                                ClusterId::node(self.base_nodes2[self.correspondence[k]]);
                            let size1 = self.tree1.size_of(a1)?
                                + self.tree1.size_of(b1)?
                                + self.tree1.size_of(c1)?;
                            let size2 = self.tree2.size_of(a2)?
                                + self.tree2.size_of(b2)?
                                + self.tree2.size_of(c2)?;
                            (
                                self.tree1.triplet_order(a1, b1, c1)?,
                                self.tree2.triplet_order(a2, b2, c2)?,
                                (size1 + size2) as u64,
                            )
                        } else {
                            (
                                self.tree1.triplet_order(
                                    ClusterId::leaf(*i),
                                    ClusterId::leaf(j),
                                    ClusterId::leaf(k),
                                )?,
                                self.tree2.triplet_order(
                                    ClusterId::leaf(*i),
                                    ClusterId::leaf(j),
                                    ClusterId::leaf(k),
                                )?,
                                6,
                            )
                        };
                        visited += 1;
                        size_sum += size_element;
                        if order1 == order2 {
                            agreed += 1;
                            agreed_size_sum += size_element;
                        }
                    }
                }
                Ok((visited, agreed, size_sum, agreed_size_sum))
            })
            .collect::<HitreeResult<Vec<_>>>()?;

        let mut visited = 0u64;
        let mut agreed = 0u64;
        let mut size_sum = 0u64;
        let mut agreed_size_sum = 0u64;
        for (partial_visited, partial_agreed, partial_size, partial_agreed_size) in folded {
            visited += partial_visited;
            agreed += partial_agreed;
            size_sum += partial_size;
            agreed_size_sum += partial_agreed_size;
        }

        let expected = binomial(count / stride, 3);
        if (visited as f64 - expected).abs() > 0.5 {
            return Err(HitreeError::Corruption(format!(
                "visited {} triples where the formula gives {}",
                visited, expected
            )));
        }

        Ok((
            agreed as f32 / visited as f32,
            agreed_size_sum as f32 / size_sum as f32,
        ))
    }

    /// Computes per-base-node noise levels from the matching distances and strips
    /// every piece of hierarchical structure finer than its noise level: a node
    /// whose level falls below the alpha-weighted mean matching distance of its
    /// contained base nodes is raised to that level (clipped at its parent) and
    /// its internal structure flattened. Returns the cluster count each tree
    /// retains at its finest usable granularity.
    pub fn apply_noise_baseline(&mut self, noise_alpha: f32) -> HitreeResult<(usize, usize)> {
        if self.correspondence.is_empty() {
            return Err(HitreeError::Precondition(
                "no correspondence in place, run a matching first",
            ));
        }
        let dists1: Vec<f32> = self
            .corresp_distances
            .iter()
            .map(|(tract_dist, _)| *tract_dist)
            .collect();
        let dists2: Vec<f32> = self
            .corresp_reverse
            .iter()
            .map(|relative1| self.corresp_distances[*relative1].0)
            .collect();

        let (noise1, granularity1, lookup1) =
            noise_baseline(self.tree1, &self.base_nodes1, &dists1, noise_alpha)?;
        let (noise2, granularity2, lookup2) =
            noise_baseline(self.tree2, &self.base_nodes2, &dists2, noise_alpha)?;
        self.noise_levels1 = noise1;
        self.noise_levels2 = noise2;
        for base in self.base_nodes1.iter_mut() {
            *base = lookup1[*base];
        }
        for base in self.base_nodes2.iter_mut() {
            *base = lookup2[*base];
        }
        if self.base_nodes1.contains(&INVALID_INDEX) || self.base_nodes2.contains(&INVALID_INDEX)
        {
            return Err(HitreeError::Corruption(
                "a matched base node vanished during noise flattening".to_string(),
            ));
        }
        Ok((granularity1, granularity2))
    }
}

/// Top-down noise sweep over one tree. Returns the per-base noise levels (in
/// base-vector order), the retained cluster count, and the node id remap of the
/// flattening cleanup.
fn noise_baseline(
    tree: &mut HcTree,
    base_nodes: &[usize],
    tract_dists: &[f32],
    noise_alpha: f32,
) -> HitreeResult<(Vec<f32>, usize, Vec<usize>)> {
    let mut noise_levels = vec![0.0f32; base_nodes.len()];
    let identity: Vec<usize> = (0..tree.num_nodes()).collect();
    if noise_alpha <= 0.0 {
        return Ok((noise_levels, base_nodes.len(), identity));
    }
    let relative: HashMap<usize, usize> = base_nodes
        .iter()
        .enumerate()
        .map(|(position, base)| (*base, position))
        .collect();
    let relative_of = |node_index: usize| -> HitreeResult<usize> {
        relative.get(&node_index).copied().ok_or_else(|| {
            HitreeError::Corruption(format!(
                "base node {} is not in the matched base vector",
                node_index
            ))
        })
    };

    let root_index = tree.num_nodes() - 1;
    let mut worklist = vec![root_index];
    let mut flat_selection = Vec::new();
    let mut granularity = 0usize;

    while let Some(node_index) = worklist.pop() {
        let contained = tree.base_nodes_under(node_index)?;
        let mut noise_sum = 0.0f64;
        let mut size_sum = 0.0f64;
        for base in &contained {
            let position = relative_of(*base)?;
            let size = tree.nodes()[*base].size() as f64;
            noise_sum += tract_dists[position] as f64 * size;
            size_sum += size;
        }
        let mut noise = if size_sum > 0.0 {
            (noise_sum / size_sum * noise_alpha as f64) as f32
        } else {
            0.0
        };

        if tree.nodes()[node_index].level() >= noise {
            if tree.nodes()[node_index].hlevel() == 1 {
                noise_levels[relative_of(node_index)?] = noise;
                granularity += 1;
            } else {
                for kid in tree.nodes()[node_index].children().to_vec() {
                    if kid.is_node() {
                        worklist.push(kid.index());
                    }
                }
            }
        } else {
            // below its own noise: clip at the parent and flatten everything under
            let parent = tree.nodes()[node_index].parent();
            if !parent.is_none() {
                let parent_level = tree.nodes()[parent.index()].level();
                if parent_level < noise {
                    noise = parent_level;
                }
            }
            tree.fetch_node(node_index)?.level = noise;
            flat_selection.push(node_index);
            granularity += 1;
            for base in &contained {
                noise_levels[relative_of(*base)?] = noise;
            }
        }
    }

    // strip the structure below the noise level, keeping the meta-leaves
    for root in &flat_selection {
        for node_index in tree.nodes_under(*root)? {
            if node_index != *root && tree.nodes()[node_index].hlevel() != 1 {
                tree.fetch_node(node_index)?.flag = true;
            }
        }
    }
    let report = tree.cleanup();
    Ok((noise_levels, granularity, report.node_lookup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::tests::three_base_tree;
    use crate::matching::TreeMatcher;
    use ndarray::Array2;
    use std::sync::Arc;
    use tractcloud::RamTractStore;

    fn identity_matched<'a>(
        tree1: &'a mut HcTree,
        tree2: &'a mut HcTree,
    ) -> TreeMatcher<'a> {
        let store = Arc::new(RamTractStore::new(vec![]));
        let mut matcher = TreeMatcher::new(tree1, tree2, store.clone(), store);
        matcher.fetch_base_nodes(true).unwrap();
        let n = matcher.base_nodes().0.len();
        let mut matrix = Array2::from_elem((n, n), 0.95f32);
        for i in 0..n {
            matrix[(i, i)] = 0.1;
        }
        matcher.dist_matrix = matrix;
        matcher.greedy_correspondence(0.9).unwrap();
        matcher
    }

    #[test]
    fn identical_trees_correlate_perfectly() {
        let mut tree1 = three_base_tree();
        let mut tree2 = three_base_tree();
        let matcher = identity_matched(&mut tree1, &mut tree2);
        let result = matcher.tcpcc().unwrap();
        assert_approx_eq!(result.scpcc, 1.0, 1e-5);
        assert_approx_eq!(result.tcpcc, 1.0, 1e-5);
        assert_approx_eq!(result.used_fraction, 1.0, 1e-6);
    }

    #[test]
    fn identical_trees_agree_on_every_triplet() {
        let mut tree1 = three_base_tree();
        let mut tree2 = three_base_tree();
        let matcher = identity_matched(&mut tree1, &mut tree2);
        let (plain, weighted) = matcher.simple_triplets(1).unwrap();
        assert_eq!(plain, 1.0);
        assert_eq!(weighted, 1.0);
    }

    #[test]
    fn triplet_subsampling_counts_match_the_formula() {
        let mut tree1 = three_base_tree();
        let mut tree2 = three_base_tree();
        let matcher = identity_matched(&mut tree1, &mut tree2);
        // three base nodes with stride 1 is the smallest valid sweep
        assert!(matcher.simple_triplets(1).is_ok());
        // stride 2 leaves a single element, not enough for a triple
        assert!(matcher.simple_triplets(2).is_err());
    }

    #[test]
    fn zero_alpha_keeps_everything() {
        let mut tree1 = three_base_tree();
        let mut tree2 = three_base_tree();
        let nodes_before = tree1.num_nodes();
        let mut matcher = identity_matched(&mut tree1, &mut tree2);
        let (granularity1, granularity2) = matcher.apply_noise_baseline(0.0).unwrap();
        assert_eq!(granularity1, 3);
        assert_eq!(granularity2, 3);
        assert_eq!(matcher.tree1.num_nodes(), nodes_before);
        assert!(matcher.noise_levels1.iter().all(|level| *level == 0.0));
    }

    #[test]
    fn heavy_noise_flattens_the_structure() {
        let mut tree1 = three_base_tree();
        let mut tree2 = three_base_tree();
        let mut matcher = identity_matched(&mut tree1, &mut tree2);
        // pretend the matching was terrible so everything sits below noise
        for (tract_dist, _) in matcher.corresp_distances.iter_mut() {
            *tract_dist = 1.0;
        }
        let (granularity1, _) = matcher.apply_noise_baseline(1.0).unwrap();
        assert_eq!(granularity1, 1);
        // the inner node between the bases and the root is gone
        assert_eq!(matcher.tree1.num_nodes(), 4);
        matcher.tree1.check().unwrap();
        assert!(matcher.tree1.is_base_node_tree());
        // pairs at or below the noise level are excluded from the correlation
        let result = matcher.tcpcc().unwrap();
        assert_eq!(result.used_fraction, 0.0);
    }
}
