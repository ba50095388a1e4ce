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

//! End-to-end builds over tiny deterministic seed sets, checked node by node.

use hitree::*;
use std::sync::Arc;
use tractcloud::{CompactTract, GridDims, RamTractStore, RoiInfo, SeedCoord};

fn line_roi(coords: Vec<SeedCoord>, dims: GridDims) -> RoiInfo {
    let count = coords.len();
    RoiInfo {
        grid: "test".to_string(),
        dims,
        num_streamlines: 0,
        seeds: coords,
        track_ids: (0..count).collect(),
    }
}

fn ram_store(tracts: Vec<Vec<f32>>) -> Arc<RamTractStore> {
    Arc::new(RamTractStore::new(
        tracts.into_iter().map(CompactTract::new).collect(),
    ))
}

/// Four seeds on a line, two identical pairs: the build must produce exactly two
/// base nodes at level 0 under a root at level 1.
fn four_seed_setup() -> (RoiInfo, Arc<RamTractStore>) {
    let roi = line_roi(
        (0..4).map(|i| SeedCoord::new(i, 0, 0)).collect(),
        GridDims { x: 4, y: 1, z: 1 },
    );
    let store = ram_store(vec![
        vec![1.0, 0.0, 0.0, 0.0],
        vec![1.0, 0.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0, 0.0],
    ]);
    (roi, store)
}

fn check_four_seed_result(build: &CentroidBuild) {
    let tree = &build.tree;
    tree.check().unwrap();
    assert_eq!(tree.num_leaves(), 4);
    assert_eq!(tree.num_nodes(), 3);

    // two base nodes of two identical tracts each, merged at distance zero
    assert_eq!(build.base_nodes, vec![0, 1]);
    for base in 0..2 {
        let node = &tree.nodes()[base];
        assert_eq!(node.size(), 2);
        assert_eq!(node.hlevel(), 1);
        assert!(node.level().abs() < 1e-5, "base level {}", node.level());
    }
    let pair0 = tree.leaves_under(ClusterId::node(0)).unwrap();
    let pair1 = tree.leaves_under(ClusterId::node(1)).unwrap();
    assert_eq!(pair0, vec![0, 1]);
    assert_eq!(pair1, vec![2, 3]);

    // the root joins the orthogonal pairs at distance one
    let root = tree.root().unwrap();
    assert_eq!(root.size(), 4);
    assert_eq!(root.hlevel(), 2);
    assert!((root.level() - 1.0).abs() < 1e-5, "root level {}", root.level());

    assert!(tree.is_base_node_tree());
    // Nseeds - 1 merges, no isolates beyond the winning root
    assert_eq!(build.report.merges, 3);
    assert_eq!(build.report.discarded_seeds, 0);
}

#[test]
fn tiny_deterministic_build() {
    let (roi, store) = four_seed_setup();
    let mut builder = CentroidBuilder::new();
    builder.set_nb_order(6).set_max_nb_dist(1.0).set_no_log(true);
    let build = builder.build(roi, store.clone(), store).unwrap();
    check_four_seed_result(&build);
}

#[test]
fn growing_policies_converge_to_the_same_tiny_tree() {
    for grow in [GrowPolicy::Size(2), GrowPolicy::Count(2)] {
        let (roi, store) = four_seed_setup();
        let mut builder = CentroidBuilder::new();
        builder
            .set_nb_order(6)
            .set_max_nb_dist(1.0)
            .set_no_log(true)
            .set_grow_policy(grow);
        let build = builder.build(roi, store.clone(), store).unwrap();
        check_four_seed_result(&build);
    }
}

#[test]
fn subdominant_isolated_component_is_pruned() {
    // two spatial components: three identical seeds win the root, the two-seed
    // component becomes an orphan and is pruned from the result
    let roi = line_roi(
        vec![
            SeedCoord::new(0, 0, 0),
            SeedCoord::new(1, 0, 0),
            SeedCoord::new(2, 0, 0),
            SeedCoord::new(5, 0, 0),
            SeedCoord::new(6, 0, 0),
        ],
        GridDims { x: 7, y: 1, z: 1 },
    );
    let store = ram_store(vec![
        vec![1.0, 0.0],
        vec![1.0, 0.0],
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![0.0, 1.0],
    ]);
    let mut builder = CentroidBuilder::new();
    builder.set_nb_order(6).set_no_log(true);
    let build = builder.build(roi, store.clone(), store).unwrap();
    let tree = &build.tree;
    tree.check().unwrap();

    assert_eq!(build.report.merges, 3);
    assert_eq!(build.report.pruned_leaves, 2);
    assert_eq!(tree.num_leaves(), 3);
    // identical tracts merge at level zero and debinarize into a single node
    assert_eq!(tree.num_nodes(), 1);
    assert_eq!(tree.root().unwrap().size(), 3);
    assert!(tree.is_base_node_tree());
}

#[test]
fn discarded_seeds_are_reported_and_kept_on_request() {
    // the third seed is orthogonal to its only neighbor, beyond the allowed
    // nearest-neighbor distance
    let roi = line_roi(
        (0..3).map(|i| SeedCoord::new(i, 0, 0)).collect(),
        GridDims { x: 3, y: 1, z: 1 },
    );
    let store = ram_store(vec![
        vec![1.0, 0.0],
        vec![1.0, 0.0],
        vec![0.0, 1.0],
    ]);
    let mut builder = CentroidBuilder::new();
    builder
        .set_nb_order(6)
        .set_no_log(true)
        .set_max_nb_dist(0.5)
        .set_keep_discarded(true);
    let build = builder.build(roi, store.clone(), store).unwrap();
    assert_eq!(build.report.discarded_seeds, 1);
    assert_eq!(build.tree.discarded, vec![SeedCoord::new(2, 0, 0)]);
    assert_eq!(build.tree.num_leaves(), 2);
}

#[test]
fn built_tree_round_trips_through_its_file() {
    let (roi, store) = four_seed_setup();
    let mut builder = CentroidBuilder::new();
    builder.set_nb_order(6).set_no_log(true);
    let build = builder.build(roi, store.clone(), store).unwrap();

    let dir = tempdir::TempDir::new("tiny").unwrap();
    let path = dir.path().join("c6.txt");
    build.tree.write_tree(&path).unwrap();
    let back = HcTree::read_tree(&path).unwrap();
    assert_eq!(back.num_leaves(), 4);
    assert_eq!(back.num_nodes(), 3);
    assert_eq!(back.root().unwrap().level(), build.tree.root().unwrap().level());
    assert_eq!(back.tree_name, "c6");
}
