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

//! # The centroid builder
//! Neighborhood-restricted agglomerative clustering. Per seed, the initializer
//! scans the spatial neighborhood and records pairwise tract dissimilarities;
//! seeds with no neighbor within reach are discarded and the id space compacted.
//! The merge loop then runs on a two-tier frontier: an ordered priority set keyed
//! by nearest-neighbor distance picks the next merge, an unordered current set
//! parks clusters grown past the priority size.
//!
//! In the optional growing stage only small clusters are active, and the frontier
//! that survives when growth stops becomes the base-node set preserved through all
//! later processing. The global stage then activates everything and merges to a
//! single root; components that run out of neighbors early either become the root
//! (when they hold most of the leaves) or are flagged as orphans and pruned.
//!
//! Merges are serial. Inside one merge the per-neighbor dissimilarities are
//! computed in a fork-join over the neighbor batch, then the maps, nearest
//! pointers and frontier keys are updated; every tie-break follows the id
//! ordering of the maps, so a build is reproducible.

mod cache;
mod deleter;
mod proto;

use crate::errors::{HitreeError, HitreeResult};
use crate::tree::{HcTree, Leaf, Node, INVALID_INDEX};
use crate::processing::TreeProcesser;
use crate::ClusterId;
use cache::ListedCache;
use deleter::TractDeleter;
use pbr::ProgressBar;
use proto::{nearest_active, ProtoNode, NO_NB_DIST};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::cmp::min;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tractcloud::{
    split_order, CompactTract, CompactTractChar, RoiInfo, SeedCoord, TractStore,
};
use yaml_rust::YamlLoader;

/// When and how the growing stage ends. While growing, only clusters up to the
/// current active size may merge, so base nodes form by homogeneous accretion.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GrowPolicy {
    /// No growing stage, plain global agglomeration
    Off,
    /// Grow until the priority size reaches this cluster size
    Size(usize),
    /// Grow until the frontier shrinks to this many clusters
    Count(usize),
}

/// Counters the build hands back for logging
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildReport {
    /// Merge events performed
    pub merges: usize,
    /// Largest neighbor set any single merge had to rescan
    pub max_neighbors: usize,
    /// Pairwise tract dissimilarities computed
    pub distance_computations: u64,
    /// Leaf tier cache hits
    pub leaf_cache_hits: u64,
    /// Leaf tier cache misses
    pub leaf_cache_misses: u64,
    /// Node tier cache hits
    pub node_cache_hits: u64,
    /// Node tier cache misses
    pub node_cache_misses: u64,
    /// Seeds discarded during neighborhood initialization
    pub discarded_seeds: usize,
    /// Leaves pruned as orphan components after the build
    pub pruned_leaves: usize,
    /// Nodes pruned as orphan components after the build
    pub pruned_nodes: usize,
}

/// What a build produces: the processed tree and, when a growing stage ran, the
/// base-node ids of the final tree.
#[derive(Debug)]
pub struct CentroidBuild {
    /// The monotonic, debinarized tree
    pub tree: HcTree,
    /// Base nodes of the final tree, empty when it is not a pure base-node tree
    pub base_nodes: Vec<usize>,
    /// Build counters
    pub report: BuildReport,
}

/// Frontier key: total order over (distance, id). Distances are nonnegative, so
/// the raw f32 bit pattern orders them; equal distances fall back to the id
/// order, which makes the merge order deterministic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PriorityKey {
    dist_bits: u32,
    id: ClusterId,
}

impl PriorityKey {
    fn new(dist: f32, id: ClusterId) -> PriorityKey {
        PriorityKey {
            dist_bits: dist.to_bits(),
            id,
        }
    }

    fn dist(&self) -> f32 {
        f32::from_bits(self.dist_bits)
    }
}

enum NbTract {
    Leaf(Arc<CompactTractChar>),
    Node(Arc<CompactTract>),
}

fn fetch_proto<'a>(
    id: ClusterId,
    proto_leaves: &'a [ProtoNode],
    proto_nodes: &'a [ProtoNode],
) -> &'a ProtoNode {
    if id.is_node() {
        &proto_nodes[id.index()]
    } else {
        &proto_leaves[id.index()]
    }
}

fn fetch_proto_mut<'a>(
    id: ClusterId,
    proto_leaves: &'a mut [ProtoNode],
    proto_nodes: &'a mut [ProtoNode],
) -> &'a mut ProtoNode {
    if id.is_node() {
        &mut proto_nodes[id.index()]
    } else {
        &mut proto_leaves[id.index()]
    }
}

fn element_size(id: ClusterId, nodes: &[Node]) -> usize {
    if id.is_node() {
        nodes[id.index()].size
    } else {
        1
    }
}

fn collect_base_nodes(priority: &BTreeSet<PriorityKey>, current: &BTreeSet<usize>) -> Vec<usize> {
    let mut bases: Vec<usize> = priority
        .iter()
        .filter(|key| key.id.is_node())
        .map(|key| key.id.index())
        .collect();
    bases.extend(current.iter().copied());
    bases.sort_unstable();
    bases.dedup();
    bases
}

/// A construction object for a centroid tree. Out-of-range parameters are clamped
/// with a warning at build time, the way the engine has always treated them.
#[derive(Debug, Clone)]
pub struct CentroidBuilder {
    pub(crate) nb_order: u32,
    pub(crate) memory_gb: f32,
    pub(crate) grow: GrowPolicy,
    pub(crate) threshold_ratio: f32,
    pub(crate) max_nb_dist: f32,
    pub(crate) no_log: bool,
    pub(crate) keep_discarded: bool,
    pub(crate) verbosity: u32,
    pub(crate) debug_folder: Option<PathBuf>,
}

impl Default for CentroidBuilder {
    fn default() -> CentroidBuilder {
        CentroidBuilder {
            nb_order: 26,
            memory_gb: 0.5,
            grow: GrowPolicy::Off,
            threshold_ratio: 0.0,
            max_nb_dist: 1.0,
            no_log: false,
            keep_discarded: false,
            verbosity: 0,
            debug_folder: None,
        }
    }
}

impl CentroidBuilder {
    /// Creates a new builder with sensible defaults.
    pub fn new() -> CentroidBuilder {
        CentroidBuilder::default()
    }

    /// Creates a builder from a yaml config file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> HitreeResult<Self> {
        let config = read_to_string(&path)?;
        let params_files = YamlLoader::load_from_str(&config)
            .map_err(|e| HitreeError::BadArgument(format!("unreadable yaml config: {}", e)))?;
        let params = &params_files[0];
        let base_size = params["base_size"].as_i64().unwrap_or(0) as usize;
        let grow = match params["grow_type"].as_str().unwrap_or("off") {
            "off" => GrowPolicy::Off,
            "size" => GrowPolicy::Size(base_size),
            "count" => GrowPolicy::Count(base_size),
            other => {
                return Err(HitreeError::BadArgument(format!(
                    "invalid growth mode: {}",
                    other
                )))
            }
        };
        Ok(CentroidBuilder {
            nb_order: params["nb_level"].as_i64().unwrap_or(26) as u32,
            memory_gb: params["memory"].as_f64().unwrap_or(0.5) as f32,
            grow,
            threshold_ratio: params["threshold_ratio"].as_f64().unwrap_or(0.0) as f32,
            max_nb_dist: params["max_nb_dist"].as_f64().unwrap_or(1.0) as f32,
            no_log: params["no_log"].as_bool().unwrap_or(false),
            keep_discarded: params["keep_discarded"].as_bool().unwrap_or(false),
            verbosity: params["verbosity"].as_i64().unwrap_or(0) as u32,
            debug_folder: None,
        })
    }

    /// Spatial neighborhood order: 6, 18, 26, 32, 92 or 124
    pub fn set_nb_order(&mut self, x: u32) -> &mut Self {
        self.nb_order = x;
        self
    }
    /// Soft memory budget in GB shared by the two tract caches
    pub fn set_memory_gb(&mut self, x: f32) -> &mut Self {
        self.memory_gb = x;
        self
    }
    /// Growing stage policy
    pub fn set_grow_policy(&mut self, x: GrowPolicy) -> &mut Self {
        self.grow = x;
        self
    }
    /// Relative tract threshold in [0, 1)
    pub fn set_threshold_ratio(&mut self, x: f32) -> &mut Self {
        self.threshold_ratio = x;
        self
    }
    /// Farthest nearest-neighbor dissimilarity a seed may have before it is
    /// discarded, in (0, 1]
    pub fn set_max_nb_dist(&mut self, x: f32) -> &mut Self {
        self.max_nb_dist = x;
        self
    }
    /// Treat tracts as natural units with no log normalization
    pub fn set_no_log(&mut self, x: bool) -> &mut Self {
        self.no_log = x;
        self
    }
    /// Keep the discarded-coordinates list on the final tree
    pub fn set_keep_discarded(&mut self, x: bool) -> &mut Self {
        self.keep_discarded = x;
        self
    }
    ///
    pub fn set_verbosity(&mut self, x: u32) -> &mut Self {
        self.verbosity = x;
        self
    }
    /// Where to drop debug dumps of partial trees on fatal errors
    pub fn set_debug_folder<P: AsRef<Path>>(&mut self, x: P) -> &mut Self {
        self.debug_folder = Some(x.as_ref().to_path_buf());
        self
    }

    /// Runs the full build: neighborhood initialization, the two-stage merge loop
    /// and the monotonicity / flatten / debinarize post-pass. The leaf store holds
    /// the per-seed tracts, the node store is the scratch space for merged mean
    /// tracts (its content is consumed and deleted as the build proceeds).
    pub fn build(
        &self,
        roi: RoiInfo,
        leaf_store: Arc<dyn TractStore>,
        node_store: Arc<dyn TractStore>,
    ) -> HitreeResult<CentroidBuild> {
        if roi.seeds.len() < 2 {
            return Err(HitreeError::Precondition(
                "clustering needs at least two seed voxels",
            ));
        }

        let max_nb_dist = if self.max_nb_dist <= 0.0 || self.max_nb_dist > 1.0 {
            log::warn!(
                "maximum neighbor distance {} out of (0,1], using 1.0",
                self.max_nb_dist
            );
            1.0
        } else {
            self.max_nb_dist
        };

        let log_factor = if self.no_log {
            0.0
        } else if roi.num_streamlines == 0 {
            log::warn!(
                "streamline count of 0, interpreting as natural-unit tracts with no log normalization"
            );
            0.0
        } else {
            (roi.num_streamlines as f32).log10()
        };

        let threshold_ratio = if self.threshold_ratio < 0.0 || self.threshold_ratio >= 1.0 {
            if self.threshold_ratio != 0.0 {
                log::warn!(
                    "threshold ratio {} out of [0,1), using 0 (no thresholding)",
                    self.threshold_ratio
                );
            }
            0.0
        } else {
            self.threshold_ratio
        };
        let tract_threshold = if threshold_ratio == 0.0 {
            0.0
        } else if log_factor == 0.0 {
            threshold_ratio
        } else {
            (roi.num_streamlines as f32 * threshold_ratio).log10() / log_factor
        };

        if self.verbosity > 0 {
            println!("Roi loaded, {} seed voxels", roi.seeds.len());
            println!("Farthest nearest neighbour distance allowed: {}", max_nb_dist);
            println!("Tractogram threshold (in log units): {}", tract_threshold);
            println!("Tractogram log factor: {}", log_factor);
        }

        // cache geometry from the first leaf tract
        let (cache_size, leaf_cache_ratio) = {
            let float_tract = leaf_store.read_leaf_tract_float(0)?;
            let char_tract = leaf_store.read_leaf_tract(0)?;
            if float_tract.is_empty() {
                return Err(HitreeError::Precondition("leaf tracts have zero length"));
            }
            let tract_mb = float_tract.mbytes();
            let leaf_tract_mb = char_tract.mbytes();
            let cache_size = (self.memory_gb as f64 * 1024.0 / (tract_mb * 2.0)) as usize;
            let ratio = (tract_mb / leaf_tract_mb) as f32;
            if self.verbosity > 0 {
                println!(
                    "Tractogram size is: {} ({:.3} MB); cache size: {} tracts ({} leaf tracts)",
                    float_tract.len(),
                    tract_mb,
                    cache_size,
                    (cache_size as f32 * ratio) as usize
                );
            }
            (cache_size, ratio)
        };

        let mut engine = Engine {
            leaf_store,
            node_store,
            log_factor,
            tract_threshold,
            max_nb_dist,
            verbosity: self.verbosity,
            debug_folder: self.debug_folder.clone(),
            roi,
            leaf_norms: Vec::new(),
            node_norms: Vec::new(),
            num_comps: 0,
        };

        engine.compute_norms()?;
        let leaf_cache_size = (cache_size as f32 * leaf_cache_ratio) as usize;
        let (proto_leaves, discarded) = engine.initialize(self.nb_order, leaf_cache_size)?;
        if proto_leaves.len() < 2 {
            return Err(HitreeError::Precondition(
                "fewer than two seeds survived neighborhood initialization",
            ));
        }

        let mut outcome = engine.cluster(
            self.grow,
            proto_leaves,
            discarded,
            cache_size,
            leaf_cache_ratio,
        )?;
        outcome.report.discarded_seeds = outcome.tree.discarded.len();

        // post-pass: monotonicity, base-node flattening, debinarization
        let keep_discarded = self.keep_discarded;
        let grow_bases = std::mem::take(&mut outcome.base_nodes);
        {
            let tree = &mut outcome.tree;
            if grow_bases.is_empty() {
                let cleaned = tree.cleanup();
                outcome.report.pruned_leaves = cleaned.pruned_leaves;
                outcome.report.pruned_nodes = cleaned.pruned_nodes;
                TreeProcesser::new(tree).force_monotonicity(1.0);
                TreeProcesser::new(tree).debinarize(false);
            } else {
                TreeProcesser::new(tree).force_monotonicity(1.0);
                let live_bases: Vec<usize> = grow_bases
                    .into_iter()
                    .filter(|base| !tree.nodes()[*base].is_flagged())
                    .collect();
                TreeProcesser::new(tree).flatten_selection(&live_bases, false)?;
                TreeProcesser::new(tree).debinarize(true);
            }
            if !keep_discarded {
                tree.discarded.clear();
            }
            tree.tree_name = format!("c{}", self.nb_order);
            tree.check().map_err(|e| {
                engine.dump_partial(tree.leaves(), tree.nodes(), "final-check");
                e
            })?;
        }

        if outcome.tree.is_base_node_tree() {
            outcome.base_nodes = outcome.tree.root_base_nodes()?;
        } else {
            if self.verbosity > 0 {
                println!("Final tree is not a pure basenode tree");
            }
            outcome.base_nodes = Vec::new();
        }

        if self.verbosity > 0 {
            println!("{}", outcome.tree.report(true));
            println!(
                "Total correlations: {}. Max #Nbs: {}. Cache hits/misses: leaves {}/{}, nodes {}/{}",
                outcome.report.distance_computations,
                outcome.report.max_neighbors,
                outcome.report.leaf_cache_hits,
                outcome.report.leaf_cache_misses,
                outcome.report.node_cache_hits,
                outcome.report.node_cache_misses,
            );
        }
        Ok(outcome)
    }
}

struct Engine {
    leaf_store: Arc<dyn TractStore>,
    node_store: Arc<dyn TractStore>,
    log_factor: f32,
    tract_threshold: f32,
    max_nb_dist: f32,
    verbosity: u32,
    debug_folder: Option<PathBuf>,
    roi: RoiInfo,
    leaf_norms: Vec<f64>,
    node_norms: Vec<f64>,
    num_comps: u64,
}

impl Engine {
    /// Precomputes the thresholded norm of every leaf tract in parallel
    fn compute_norms(&mut self) -> HitreeResult<()> {
        if self.verbosity > 0 {
            println!("Precomputing tractogram norms");
        }
        let threshold = self.tract_threshold;
        let leaf_store = &self.leaf_store;
        let norms: Vec<HitreeResult<f64>> = (0..self.roi.seeds.len())
            .into_par_iter()
            .map(|seed_id| {
                let mut tract = leaf_store.read_leaf_tract(seed_id)?;
                tract.threshold(threshold);
                Ok(tract.compute_norm())
            })
            .collect();
        self.leaf_norms = norms.into_iter().collect::<HitreeResult<Vec<f64>>>()?;
        for (seed_id, norm) in self.leaf_norms.iter().enumerate() {
            if *norm == 0.0 {
                log::warn!("leaf tract {} has norm 0", seed_id);
            }
        }
        Ok(())
    }

    fn load_leaf_tract(
        &self,
        id: usize,
        cache: &mut ListedCache<CompactTractChar>,
    ) -> HitreeResult<Arc<CompactTractChar>> {
        if !cache.active() {
            let mut tract = self.leaf_store.read_leaf_tract(id)?;
            tract.threshold(self.tract_threshold);
            tract.set_norm(self.leaf_norms[id]);
            return Ok(Arc::new(tract));
        }
        if let Some(tract) = cache.get(id) {
            return Ok(tract);
        }
        let mut tract = self.leaf_store.read_leaf_tract(id)?;
        tract.threshold(self.tract_threshold);
        tract.set_norm(self.leaf_norms[id]);
        Ok(cache.insert(id, tract))
    }

    fn load_node_tract(
        &self,
        id: usize,
        cache: &mut ListedCache<CompactTract>,
    ) -> HitreeResult<Arc<CompactTract>> {
        if let Some(tract) = cache.get(id) {
            return Ok(tract);
        }
        let mut tract = self.node_store.read_node_tract(id)?;
        tract.do_log(self.log_factor)?;
        tract.threshold(self.tract_threshold);
        tract.set_norm(self.node_norms[id]);
        Ok(cache.insert(id, tract))
    }

    fn load_tract(
        &self,
        id: ClusterId,
        leaves_cache: &mut ListedCache<CompactTractChar>,
        nodes_cache: &mut ListedCache<CompactTract>,
    ) -> HitreeResult<NbTract> {
        if id.is_node() {
            Ok(NbTract::Node(self.load_node_tract(id.index(), nodes_cache)?))
        } else {
            Ok(NbTract::Leaf(self.load_leaf_tract(id.index(), leaves_cache)?))
        }
    }

    fn dump_partial(&self, leaves: &[Leaf], nodes: &[Node], reason: &str) {
        if let Some(folder) = &self.debug_folder {
            let mut partial = HcTree::from_parts(
                format!("debug_{}", reason),
                self.roi.grid.clone(),
                self.roi.dims,
                self.roi.num_streamlines,
                self.log_factor,
                leaves.to_vec(),
                nodes.to_vec(),
                self.roi.seeds.clone(),
                self.roi.track_ids.clone(),
                Vec::new(),
            );
            partial.comments.push(format!("# dumped on: {}", reason));
            partial.write_tree_debug(folder.join(format!("treeErrorDebug_{}.txt", reason)));
        }
    }

    /// Per-seed neighborhood scan. Pairwise dissimilarities are computed once,
    /// the later seed of a pair reads the earlier seed's map. Returns the
    /// compacted proto leaves and the discarded coordinates.
    fn initialize(
        &mut self,
        nb_order: u32,
        leaf_cache_size: usize,
    ) -> HitreeResult<(Vec<ProtoNode>, Vec<SeedCoord>)> {
        if self.verbosity > 0 {
            println!("Initializing seed neighbor dissimilarity information");
        }
        let (order1, order2) =
            split_order(nb_order).map_err(|e| HitreeError::BadArgument(e.to_string()))?;
        let roimap = self.roi.coord_map();
        let seed_count = self.roi.seeds.len();
        let dims = self.roi.dims;
        let mut proto_leaves: Vec<ProtoNode> = Vec::with_capacity(seed_count);
        let mut cache: ListedCache<CompactTractChar> =
            ListedCache::new(seed_count, leaf_cache_size);
        let mut progress = ProgressBar::new(seed_count as u64);

        for seed_id in 0..seed_count {
            let this_tract = self.load_leaf_tract(seed_id, &mut cache)?;

            // spatial neighbors that are themselves seeds
            let seed_coord = self.roi.seeds[seed_id];
            let mut nb_coords: Vec<SeedCoord> = seed_coord
                .phys_neighbors(dims, order1)?
                .into_iter()
                .filter(|coord| roimap.contains_key(coord))
                .collect();
            if order2 != 0 {
                let mut all_coords: BTreeSet<SeedCoord> = nb_coords.iter().copied().collect();
                for first_pass in &nb_coords {
                    for second_pass in first_pass.phys_neighbors(dims, order2)? {
                        all_coords.insert(second_pass);
                    }
                }
                all_coords.remove(&seed_coord);
                nb_coords = all_coords
                    .into_iter()
                    .filter(|coord| roimap.contains_key(coord))
                    .collect();
            }
            let mut nb_ids: Vec<usize> = nb_coords.iter().map(|coord| roimap[coord]).collect();
            nb_ids.sort_unstable();

            // collect distances: fresh pairs forward, already-computed pairs from
            // the earlier seed's map
            let mut nb_map: BTreeMap<ClusterId, f32> = BTreeMap::new();
            let mut discard = true;
            let mut fresh: Vec<(usize, Arc<CompactTractChar>)> = Vec::new();
            for nb_id in nb_ids {
                if seed_id < nb_id {
                    let nb_tract = self.load_leaf_tract(nb_id, &mut cache)?;
                    fresh.push((nb_id, nb_tract));
                } else {
                    if nb_id >= proto_leaves.len() {
                        return Err(HitreeError::Corruption(format!(
                            "neighbor {} of seed {} was never scanned",
                            nb_id, seed_id
                        )));
                    }
                    if proto_leaves[nb_id].discarded {
                        continue;
                    }
                    match proto_leaves[nb_id].nbs.get(&ClusterId::leaf(seed_id)) {
                        Some(dist) => {
                            if *dist <= self.max_nb_dist {
                                discard = false;
                            }
                            nb_map.insert(ClusterId::leaf(nb_id), *dist);
                        }
                        None => {
                            return Err(HitreeError::Corruption(format!(
                                "seed {} missing from the map of processed neighbor {}",
                                seed_id, nb_id
                            )))
                        }
                    }
                }
            }
            let fresh_refs: Vec<&CompactTractChar> =
                fresh.iter().map(|(_, nb_tract)| nb_tract.as_ref()).collect();
            let fresh_dists = this_tract.distances_to_batch(&fresh_refs)?;
            self.num_comps += fresh_dists.len() as u64;
            for ((nb_id, _), dist) in fresh.iter().zip(&fresh_dists) {
                if *dist <= self.max_nb_dist {
                    discard = false;
                }
                nb_map.insert(ClusterId::leaf(*nb_id), *dist);
            }

            if discard {
                proto_leaves.push(ProtoNode::new_discarded());
            } else {
                let (near_nb, near_dist) = nearest_active(&nb_map, &[]);
                proto_leaves.push(ProtoNode::new(near_nb, near_dist, nb_map, true));
            }

            cache.erase(seed_id);
            cache.cleanup();
            if self.verbosity > 1 {
                progress.inc();
            }
        }
        if self.verbosity > 1 {
            progress.finish_print("leaves initialized");
        }

        // compact the id space, dropping discarded seeds
        let mut lookup = vec![INVALID_INDEX; seed_count];
        let mut valid_count = 0;
        for (seed_id, proto) in proto_leaves.iter().enumerate() {
            if !proto.discarded {
                lookup[seed_id] = valid_count;
                valid_count += 1;
            }
        }
        let mut discarded: Vec<SeedCoord> = Vec::new();
        let mut compacted: Vec<ProtoNode> = Vec::with_capacity(valid_count);
        let mut new_seeds = Vec::with_capacity(valid_count);
        let mut new_track_ids = Vec::with_capacity(valid_count);
        let mut new_norms = Vec::with_capacity(valid_count);
        for (seed_id, mut proto) in proto_leaves.into_iter().enumerate() {
            if proto.discarded {
                discarded.push(self.roi.seeds[seed_id]);
                continue;
            }
            let near_index = lookup[proto.near_nb.index()];
            if near_index == INVALID_INDEX {
                return Err(HitreeError::Corruption(format!(
                    "nearest neighbor of seed {} was discarded",
                    seed_id
                )));
            }
            proto.near_nb = ClusterId::leaf(near_index);
            proto.nbs = proto
                .nbs
                .iter()
                .filter_map(|(id, dist)| {
                    let new_index = lookup[id.index()];
                    if new_index == INVALID_INDEX {
                        None
                    } else {
                        Some((ClusterId::leaf(new_index), *dist))
                    }
                })
                .collect();
            compacted.push(proto);
            new_seeds.push(self.roi.seeds[seed_id]);
            new_track_ids.push(self.roi.track_ids[seed_id]);
            new_norms.push(self.leaf_norms[seed_id]);
        }
        discarded.sort();
        self.roi.seeds = new_seeds;
        self.roi.track_ids = new_track_ids;
        self.leaf_norms = new_norms;

        if self.verbosity > 0 {
            let mean_nbs: f32 = compacted.iter().map(|p| p.nbs.len()).sum::<usize>() as f32
                / compacted.len() as f32;
            println!(
                "Done. Mean number of neighbors: {:.2}. Discarded {} seeds",
                mean_nbs,
                discarded.len()
            );
        }
        Ok((compacted, discarded))
    }

    /// The two-stage merge loop
    fn cluster(
        &mut self,
        grow: GrowPolicy,
        mut proto_leaves: Vec<ProtoNode>,
        discarded: Vec<SeedCoord>,
        cache_size: usize,
        leaf_cache_ratio: f32,
    ) -> HitreeResult<CentroidBuild> {
        let seed_count = proto_leaves.len();
        if self.verbosity > 0 {
            println!("Starting tree build-up");
        }

        let mut leaves: Vec<Leaf> = (0..seed_count).map(Leaf::new).collect();
        let mut nodes: Vec<Node> = Vec::with_capacity(seed_count);
        let mut proto_nodes: Vec<ProtoNode> = Vec::with_capacity(seed_count);
        self.node_norms.clear();
        self.node_norms.reserve(seed_count);

        let mut priority: BTreeSet<PriorityKey> = BTreeSet::new();
        let mut current: BTreeSet<usize> = BTreeSet::new();
        for (seed_id, proto) in proto_leaves.iter().enumerate() {
            priority.insert(PriorityKey::new(proto.near_dist, ClusterId::leaf(seed_id)));
        }

        let (mut growing, mut active_size, mut priority_size) = match grow {
            GrowPolicy::Off => (false, seed_count, seed_count),
            GrowPolicy::Size(base) | GrowPolicy::Count(base) if base <= 1 => {
                (false, seed_count, seed_count)
            }
            _ => (true, 1, 1),
        };

        let mut leaves_cache: ListedCache<CompactTractChar> = ListedCache::new(
            seed_count,
            (cache_size as f32 * leaf_cache_ratio) as usize,
        );
        let mut nodes_cache: ListedCache<CompactTract> =
            ListedCache::new(seed_count, cache_size);
        let mut deleter = TractDeleter::new(Arc::clone(&self.node_store));

        let mut done_leaves = 0usize;
        let mut base_nodes: Vec<usize> = Vec::new();
        let mut root_children: SmallVec<[ClusterId; 8]> = smallvec![];
        let mut root_size = 0usize;
        let mut root_hlevel = 0usize;
        let mut merges = 0usize;
        let mut max_nbs = 0usize;
        let mut grow_just_ended = false;
        let mut progress = ProgressBar::new((seed_count - 1) as u64);

        while !priority.is_empty() || current.len() > 1 {
            while !priority.is_empty() {
                let first = *priority.iter().next().ok_or_else(|| {
                    HitreeError::Corruption("priority set emptied underneath the loop".to_string())
                })?;
                let new_dist = first.dist();
                if new_dist >= NO_NB_DIST {
                    // nothing in the priority set has an active neighbor
                    break;
                }
                let id_a = first.id;
                let (near_a, near_dist_a) = {
                    let proto_a = fetch_proto(id_a, &proto_leaves, &proto_nodes);
                    (proto_a.near_nb, proto_a.near_dist)
                };
                let id_b = near_a;

                // frontier consistency: the key must match the proto record, and
                // unless the growing stage allows asymmetry, the partner must
                // point back
                let mut broken = near_dist_a != new_dist || id_b.is_none() || id_b == id_a;
                let (near_b, near_dist_b) = if broken {
                    (ClusterId::NONE, NO_NB_DIST)
                } else {
                    let proto_b = fetch_proto(id_b, &proto_leaves, &proto_nodes);
                    if proto_b.near_dist != new_dist || proto_b.near_nb != id_a {
                        if !growing || priority_size == active_size {
                            broken = true;
                        } else if !proto_b.nbs.contains_key(&id_a) {
                            broken = true;
                        }
                    }
                    (proto_b.near_nb, proto_b.near_dist)
                };
                if broken {
                    self.dump_partial(&leaves, &nodes, "frontier");
                    return Err(HitreeError::Corruption(format!(
                        "frontier does not agree with proto data: key {} at {}, near {} ({} at {})",
                        id_a, new_dist, id_b, near_b, near_dist_b
                    )));
                }

                let size_a = element_size(id_a, &nodes);
                let size_b = element_size(id_b, &nodes);
                let new_size = size_a + size_b;
                let new_index = nodes.len();
                let new_hlevel = {
                    let hlevel_a = if id_a.is_node() { nodes[id_a.index()].hlevel } else { 0 };
                    let hlevel_b = if id_b.is_node() { nodes[id_b.index()].hlevel } else { 0 };
                    hlevel_a.max(hlevel_b) + 1
                };

                // natural-unit tracts of the two children; a node's stored mean is
                // consumed and its file scheduled for deletion
                let tract_a = if id_a.is_node() {
                    let tract = self.node_store.read_node_tract(id_a.index())?;
                    deleter.schedule(id_a.index());
                    nodes_cache.erase(id_a.index());
                    tract
                } else {
                    let mut tract = self.leaf_store.read_leaf_tract_float(id_a.index())?;
                    tract.un_log(self.log_factor)?;
                    done_leaves += 1;
                    leaves_cache.erase(id_a.index());
                    tract
                };
                let tract_b = if id_b.is_node() {
                    let tract = self.node_store.read_node_tract(id_b.index())?;
                    deleter.schedule(id_b.index());
                    nodes_cache.erase(id_b.index());
                    tract
                } else {
                    let mut tract = self.leaf_store.read_leaf_tract_float(id_b.index())?;
                    tract.un_log(self.log_factor)?;
                    done_leaves += 1;
                    leaves_cache.erase(id_b.index());
                    tract
                };

                // pull both children off the frontier
                priority.remove(&first);
                if id_b.is_node() && nodes[id_b.index()].size > priority_size {
                    current.remove(&id_b.index());
                } else if !priority.remove(&PriorityKey::new(near_dist_b, id_b)) {
                    self.dump_partial(&leaves, &nodes, "partner");
                    return Err(HitreeError::Corruption(format!(
                        "merge partner {} was not on the frontier",
                        id_b
                    )));
                }

                // reparent
                if id_a.is_node() {
                    nodes[id_a.index()].parent = ClusterId::node(new_index);
                } else {
                    leaves[id_a.index()].parent = ClusterId::node(new_index);
                }
                if id_b.is_node() {
                    nodes[id_b.index()].parent = ClusterId::node(new_index);
                } else {
                    leaves[id_b.index()].parent = ClusterId::node(new_index);
                }

                // merged neighborhood, the union minus the children themselves
                let mut new_nbs: BTreeMap<ClusterId, f32> = {
                    let proto_a = fetch_proto_mut(id_a, &mut proto_leaves, &mut proto_nodes);
                    let map = std::mem::take(&mut proto_a.nbs);
                    proto_a.retire();
                    map
                };
                {
                    let proto_b = fetch_proto_mut(id_b, &mut proto_leaves, &mut proto_nodes);
                    for (id, dist) in std::mem::take(&mut proto_b.nbs) {
                        new_nbs.entry(id).or_insert(dist);
                    }
                    proto_b.retire();
                }
                new_nbs.remove(&id_a);
                new_nbs.remove(&id_b);
                max_nbs = max_nbs.max(new_nbs.len());

                // the merged mean tract: written out in natural units, cached in
                // log units with threshold and norm
                let merged = CompactTract::merged(&tract_a, &tract_b, size_a, size_b)?;
                self.node_store.write_node_tract(new_index, &merged)?;
                let mut log_tract = merged;
                log_tract.do_log(self.log_factor)?;
                log_tract.threshold(self.tract_threshold);
                self.node_norms.push(log_tract.compute_norm());
                let new_tract = nodes_cache.insert(new_index, log_tract);

                let new_is_active = new_size <= active_size;
                proto_nodes.push(ProtoNode::new(
                    ClusterId::NONE,
                    NO_NB_DIST,
                    new_nbs,
                    new_is_active,
                ));

                // distances to every neighbor: serial cache loads, then a
                // fork-join over the batch
                let nb_ids: Vec<ClusterId> =
                    proto_nodes[new_index].nbs.keys().copied().collect();
                let mut nb_tracts: Vec<NbTract> = Vec::with_capacity(nb_ids.len());
                for nb_id in &nb_ids {
                    nb_tracts.push(self.load_tract(
                        *nb_id,
                        &mut leaves_cache,
                        &mut nodes_cache,
                    )?);
                }
                let nb_dists: Vec<f32> = nb_tracts
                    .par_iter()
                    .map(|nb_tract| match nb_tract {
                        NbTract::Leaf(char_tract) => new_tract.tract_distance_char(char_tract),
                        NbTract::Node(float_tract) => new_tract.tract_distance(float_tract),
                    })
                    .collect::<Result<Vec<f32>, _>>()?;
                self.num_comps += nb_dists.len() as u64;

                // write the fresh distances into both sides, refresh each
                // neighbor's nearest pointer and its frontier key
                let mut new_near = (ClusterId::NONE, NO_NB_DIST);
                for (position, nb_id) in nb_ids.iter().enumerate() {
                    let dist = nb_dists[position];
                    proto_nodes[new_index].nbs.insert(*nb_id, dist);
                    let nb_active = if nb_id.is_node() {
                        proto_nodes[nb_id.index()].active
                    } else {
                        true
                    };
                    if nb_active && dist < new_near.1 {
                        new_near = (*nb_id, dist);
                    }

                    {
                        let proto_nb =
                            fetch_proto_mut(*nb_id, &mut proto_leaves, &mut proto_nodes);
                        proto_nb.nbs.remove(&id_a);
                        proto_nb.nbs.remove(&id_b);
                        proto_nb.nbs.insert(ClusterId::node(new_index), dist);
                    }
                    let old_near_dist =
                        fetch_proto(*nb_id, &proto_leaves, &proto_nodes).near_dist;
                    let (nb_near, nb_near_dist) = if nb_id.is_node() {
                        nearest_active(&proto_nodes[nb_id.index()].nbs, &proto_nodes)
                    } else {
                        nearest_active(&proto_leaves[nb_id.index()].nbs, &proto_nodes)
                    };
                    let changed = {
                        let proto_nb =
                            fetch_proto_mut(*nb_id, &mut proto_leaves, &mut proto_nodes);
                        if proto_nb.near_nb != nb_near || proto_nb.near_dist != nb_near_dist {
                            proto_nb.near_nb = nb_near;
                            proto_nb.near_dist = nb_near_dist;
                            true
                        } else {
                            false
                        }
                    };
                    if changed {
                        let in_priority = !nb_id.is_node()
                            || nodes[nb_id.index()].size <= priority_size;
                        if in_priority {
                            if !priority.remove(&PriorityKey::new(old_near_dist, *nb_id)) {
                                self.dump_partial(&leaves, &nodes, "neighbor");
                                return Err(HitreeError::Corruption(format!(
                                    "neighbor {} was keyed at a stale distance",
                                    nb_id
                                )));
                            }
                            priority.insert(PriorityKey::new(nb_near_dist, *nb_id));
                        }
                    }
                }
                proto_nodes[new_index].near_nb = new_near.0;
                proto_nodes[new_index].near_dist = new_near.1;

                // rebalance the cache budgets: half for leaves while both tiers
                // are live, everything to nodes once the leaves are gone
                if leaves_cache.active() {
                    let wanted = if growing {
                        (leaf_cache_ratio * cache_size as f32) as usize
                    } else {
                        (leaf_cache_ratio * cache_size as f32 / 2.0) as usize
                    };
                    let leaves_budget = min(seed_count - done_leaves, wanted);
                    leaves_cache.set_limit(leaves_budget);
                    if leaves_budget == 0 {
                        leaves_cache.shutdown();
                    } else {
                        leaves_cache.cleanup();
                    }
                    nodes_cache.set_limit(
                        cache_size - (leaves_budget as f32 / leaf_cache_ratio) as usize + 1,
                    );
                }
                nodes_cache.cleanup();

                // the new tree node
                nodes.push(Node::new(
                    new_index,
                    smallvec![id_a, id_b],
                    new_size,
                    new_dist,
                    new_hlevel,
                ));
                merges += 1;
                if self.verbosity > 1 {
                    progress.inc();
                }

                if proto_nodes[new_index].nbs.is_empty() {
                    // isolated component: either the dominant root or an orphan
                    root_children.push(ClusterId::node(new_index));
                    root_size += new_size;
                    root_hlevel = root_hlevel.max(new_hlevel + 1);
                    deleter.schedule(new_index);
                    nodes_cache.erase(new_index);
                    if new_size > seed_count / 2 {
                        if self.verbosity > 0 && new_size != seed_count {
                            println!(
                                "Node {} holds {:.1}% of the leaves, keeping it as root",
                                new_index,
                                new_size as f32 * 100.0 / seed_count as f32
                            );
                        }
                    } else {
                        if new_size > seed_count / 20 {
                            log::warn!(
                                "{}% of the leaves sit on an isolated component, its branch will be pruned",
                                new_size * 100 / seed_count
                            );
                        }
                        let mut worklist = vec![ClusterId::node(new_index)];
                        while let Some(current_id) = worklist.pop() {
                            if current_id.is_node() {
                                nodes[current_id.index()].flag = true;
                                worklist
                                    .extend(nodes[current_id.index()].children.iter().copied());
                            } else {
                                leaves[current_id.index()].flag = true;
                            }
                        }
                    }
                } else if new_size > priority_size {
                    current.insert(new_index);
                } else {
                    priority.insert(PriorityKey::new(
                        proto_nodes[new_index].near_dist,
                        ClusterId::node(new_index),
                    ));
                }

                // count-based growth ends once the frontier is small enough
                if growing {
                    if let GrowPolicy::Count(target) = grow {
                        if current.len() + priority.len() <= target {
                            growing = false;
                            grow_just_ended = true;
                            base_nodes = collect_base_nodes(&priority, &current);
                            active_size = seed_count;
                            priority_size = seed_count;
                            break;
                        }
                    }
                }
            } // end inner loop

            if growing {
                if !priority.is_empty() {
                    active_size += 1;
                } else if !current.is_empty() {
                    priority_size += 1;
                    let size_target = match grow {
                        GrowPolicy::Size(target) => target,
                        _ => usize::MAX,
                    };
                    if priority_size >= size_target {
                        growing = false;
                        grow_just_ended = true;
                        base_nodes = collect_base_nodes(&priority, &current);
                        priority_size = seed_count;
                        active_size = seed_count;
                    } else {
                        active_size = priority_size;
                    }
                }
            } else if current.is_empty() && !grow_just_ended {
                break;
            }

            if growing || !current.is_empty() || grow_just_ended {
                grow_just_ended = false;
                // apply the new active size to every live node, then refresh the
                // nearest pointers the activity change may have shifted
                let current_list: Vec<usize> = current.iter().copied().collect();
                for node_index in &current_list {
                    proto_nodes[*node_index].active =
                        nodes[*node_index].size <= active_size;
                }
                let priority_entries: Vec<PriorityKey> = priority.iter().copied().collect();
                for key in &priority_entries {
                    if key.id.is_node() {
                        proto_nodes[key.id.index()].active =
                            nodes[key.id.index()].size <= active_size;
                    }
                }
                for key in priority_entries {
                    let id = key.id;
                    let (near_nb, near_dist) = if id.is_node() {
                        nearest_active(&proto_nodes[id.index()].nbs, &proto_nodes)
                    } else {
                        nearest_active(&proto_leaves[id.index()].nbs, &proto_nodes)
                    };
                    let proto = fetch_proto_mut(id, &mut proto_leaves, &mut proto_nodes);
                    if proto.near_nb != near_nb || proto.near_dist != near_dist {
                        proto.near_nb = near_nb;
                        proto.near_dist = near_dist;
                        priority.remove(&key);
                        priority.insert(PriorityKey::new(near_dist, id));
                    }
                }
                // promote current nodes that now fit the priority size
                for node_index in current_list {
                    let (near_nb, near_dist) =
                        nearest_active(&proto_nodes[node_index].nbs, &proto_nodes);
                    proto_nodes[node_index].near_nb = near_nb;
                    proto_nodes[node_index].near_dist = near_dist;
                    if nodes[node_index].size <= priority_size {
                        priority
                            .insert(PriorityKey::new(near_dist, ClusterId::node(node_index)));
                        current.remove(&node_index);
                    }
                }
            }
        } // end outer loop

        deleter.drain();
        if self.verbosity > 1 {
            progress.finish_print("tree built");
        }
        if !priority.is_empty() {
            log::warn!(
                "{} frontier entries were left unmerged after the build",
                priority.len()
            );
            self.dump_partial(&leaves, &nodes, "leftover");
        }
        let leaf_hits = leaves_cache.hits();
        let leaf_misses = leaves_cache.misses();
        let node_hits = nodes_cache.hits();
        let node_misses = nodes_cache.misses();
        leaves_cache.shutdown();
        nodes_cache.shutdown();

        // settle the root: a single surviving top node is the root as it stands,
        // several isolated components hang from a synthetic root whose level is
        // the one valid top component's level
        if root_children.is_empty() {
            self.dump_partial(&leaves, &nodes, "rootless");
            return Err(HitreeError::Corruption(
                "the merge loop ended without a top node".to_string(),
            ));
        }
        if root_children.len() > 1 {
            let root_index = nodes.len();
            let mut valid_tops = 0;
            let mut root_level = 1.0f32;
            for top in &root_children {
                nodes[top.index()].parent = ClusterId::node(root_index);
                if !nodes[top.index()].flag {
                    root_level = nodes[top.index()].level;
                    valid_tops += 1;
                }
            }
            if valid_tops != 1 {
                log::warn!("{} valid top nodes after the build", valid_tops);
                self.dump_partial(&leaves, &nodes, "multiroot");
            }
            nodes.push(Node::new(
                root_index,
                root_children,
                root_size,
                root_level,
                root_hlevel,
            ));
        }

        let tree = HcTree::from_parts(
            String::new(),
            self.roi.grid.clone(),
            self.roi.dims,
            self.roi.num_streamlines,
            self.log_factor,
            leaves,
            nodes,
            self.roi.seeds.clone(),
            self.roi.track_ids.clone(),
            discarded,
        );
        tree.check().map_err(|e| {
            self.dump_partial(tree.leaves(), tree.nodes(), "raw-check");
            e
        })?;

        if self.verbosity > 0 {
            println!(
                "100% of tree built: {} merges, max neighbors {}",
                merges, max_nbs
            );
        }

        Ok(CentroidBuild {
            tree,
            base_nodes,
            report: BuildReport {
                merges,
                max_neighbors: max_nbs,
                distance_computations: self.num_comps,
                leaf_cache_hits: leaf_hits,
                leaf_cache_misses: leaf_misses,
                node_cache_hits: node_hits,
                node_cache_misses: node_misses,
                discarded_seeds: 0,
                pruned_leaves: 0,
                pruned_nodes: 0,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tractcloud::{GridDims, RamTractStore};

    pub(crate) fn line_roi(count: usize) -> RoiInfo {
        RoiInfo {
            grid: "test".to_string(),
            dims: GridDims {
                x: count,
                y: 1,
                z: 1,
            },
            num_streamlines: 0,
            seeds: (0..count).map(|i| SeedCoord::new(i as i32, 0, 0)).collect(),
            track_ids: (0..count).collect(),
        }
    }

    fn line_store(tracts: Vec<Vec<f32>>) -> Arc<RamTractStore> {
        Arc::new(RamTractStore::new(
            tracts.into_iter().map(CompactTract::new).collect(),
        ))
    }

    #[test]
    fn initialize_collects_neighbor_distances() {
        let store = line_store(vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
        ]);
        let mut engine = Engine {
            leaf_store: store.clone(),
            node_store: store,
            log_factor: 0.0,
            tract_threshold: 0.0,
            max_nb_dist: 1.0,
            verbosity: 0,
            debug_folder: None,
            roi: line_roi(4),
            leaf_norms: Vec::new(),
            node_norms: Vec::new(),
            num_comps: 0,
        };
        engine.compute_norms().unwrap();
        let (protos, discarded) = engine.initialize(6, 16).unwrap();
        assert!(discarded.is_empty());
        assert_eq!(protos.len(), 4);
        // the line gives one neighbor at each end, two in the middle
        assert_eq!(protos[0].nbs.len(), 1);
        assert_eq!(protos[1].nbs.len(), 2);
        assert_eq!(protos[0].near_nb, ClusterId::leaf(1));
        assert!(protos[0].near_dist.abs() < 1e-6);
        // orthogonal neighbors sit at distance 1
        assert!((protos[1].nbs[&ClusterId::leaf(2)] - 1.0).abs() < 1e-6);
        // the map is symmetric
        assert_eq!(
            protos[1].nbs[&ClusterId::leaf(2)],
            protos[2].nbs[&ClusterId::leaf(1)]
        );
    }

    #[test]
    fn initialize_discards_out_of_reach_seeds() {
        let store = line_store(vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
        ]);
        let mut engine = Engine {
            leaf_store: store.clone(),
            node_store: store,
            log_factor: 0.0,
            tract_threshold: 0.0,
            max_nb_dist: 0.5,
            verbosity: 0,
            debug_folder: None,
            roi: line_roi(3),
            leaf_norms: Vec::new(),
            node_norms: Vec::new(),
            num_comps: 0,
        };
        engine.compute_norms().unwrap();
        let (protos, discarded) = engine.initialize(6, 16).unwrap();
        // seed 2 is orthogonal to its only neighbor, so it is discarded and the
        // id space compacts to the two survivors
        assert_eq!(discarded, vec![SeedCoord::new(2, 0, 0)]);
        assert_eq!(protos.len(), 2);
        assert_eq!(engine.roi.seeds.len(), 2);
        assert_eq!(protos[0].nbs.len(), 1);
        assert_eq!(protos[1].nbs.len(), 1);
        assert_eq!(protos[1].near_nb, ClusterId::leaf(0));
    }

    #[test]
    fn bad_neighborhood_order_is_rejected() {
        let store = line_store(vec![vec![1.0], vec![1.0]]);
        let builder = CentroidBuilder::default();
        let mut bad = builder.clone();
        bad.set_nb_order(7);
        let result = bad.build(line_roi(2), store.clone(), store);
        match result {
            Err(HitreeError::BadArgument(_)) => {}
            other => panic!("expected BadArgument, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn single_seed_is_rejected() {
        let store = line_store(vec![vec![1.0]]);
        let result = CentroidBuilder::default().build(line_roi(1), store.clone(), store);
        assert!(result.is_err());
    }

    #[test]
    fn grow_policies_map_to_stage_sizes() {
        // growth off or trivial base sizes skip the growing stage entirely
        let store = line_store(vec![
            vec![1.0, 0.0],
            vec![1.0, 0.1],
            vec![0.9, 0.2],
            vec![0.8, 0.3],
        ]);
        for grow in [GrowPolicy::Off, GrowPolicy::Size(1), GrowPolicy::Count(0)] {
            let mut builder = CentroidBuilder::default();
            builder.set_nb_order(6).set_grow_policy(grow);
            let build = builder
                .build(line_roi(4), store.clone(), store.clone())
                .unwrap();
            assert_eq!(build.report.merges, 3);
            assert_eq!(build.tree.num_leaves(), 4);
        }
    }
}
