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

//! Utility functions for i/o

use crate::builder::{CentroidBuild, CentroidBuilder};
use crate::errors::{HitreeError, HitreeResult};
use crate::tree::HcTree;
use std::fs::read_to_string;
use std::path::Path;
use std::sync::Arc;
use tractcloud::{FsTractStore, RoiInfo};
use yaml_rust::YamlLoader;

/// Given a yaml file on disk, it builds a centroid tree.
///
/// ```yaml
/// ---
/// roi_path: ROI_FILE
/// single_tracts: LEAF_TRACT_FOLDER
/// mean_tracts: SCRATCH_FOLDER
/// zipped: false
/// nb_level: 26
/// memory: 2.0
/// grow_type: size
/// base_size: 50
/// threshold_ratio: 0.001
/// max_nb_dist: 1.0
/// verbosity: 1
/// ```
pub fn centroid_tree_from_yaml<P: AsRef<Path>>(path: P) -> HitreeResult<CentroidBuild> {
    let config = read_to_string(&path)?;
    let params_files = YamlLoader::load_from_str(&config)
        .map_err(|e| HitreeError::BadArgument(format!("unreadable yaml config: {}", e)))?;
    let params = &params_files[0];

    let roi_path = params["roi_path"]
        .as_str()
        .ok_or_else(|| HitreeError::BadArgument("config is missing roi_path".to_string()))?;
    let single_tracts = params["single_tracts"].as_str().ok_or_else(|| {
        HitreeError::BadArgument("config is missing single_tracts".to_string())
    })?;
    let mean_tracts = params["mean_tracts"]
        .as_str()
        .ok_or_else(|| HitreeError::BadArgument("config is missing mean_tracts".to_string()))?;
    let zipped = params["zipped"].as_bool().unwrap_or(false);

    let roi = RoiInfo::read(roi_path)?;
    let leaf_store = FsTractStore::new(single_tracts);
    let mut node_store = FsTractStore::new(mean_tracts);
    node_store.store_zipped(zipped);

    let builder = CentroidBuilder::from_yaml(&path)?;
    builder.build(roi, Arc::new(leaf_store), Arc::new(node_store))
}

/// Helper function that handles the tree file writing and reporting for you.
pub fn save_tree<P: AsRef<Path>>(tree_path: P, tree: &HcTree, verbose: bool) -> HitreeResult<()> {
    tree.write_tree(&tree_path)?;
    if verbose {
        println!(
            "Written standard tree file in: {}",
            tree_path.as_ref().display()
        );
    }
    Ok(())
}

/// Helper function that loads a tree file and validates it.
pub fn load_tree<P: AsRef<Path>>(tree_path: P, verbose: bool) -> HitreeResult<HcTree> {
    let tree = HcTree::read_tree(&tree_path)?;
    if verbose {
        println!("{}", tree.report(true));
    }
    Ok(tree)
}
