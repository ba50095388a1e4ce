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

//! # Tract Cloud
//! Abstracts access to the probabilistic tractograms of a seed voxel region.
//! Every tract is a fixed-length vector of nonnegative intensities on a shared
//! white-matter target mask; this crate owns the compact representations, the
//! log/threshold transforms, the normalized-dot dissimilarity, the spatial
//! neighborhood enumeration and the on-disk / in-RAM tract stores.

#![allow(dead_code)]
#![warn(missing_docs)]

#[macro_use]
extern crate serde;

pub mod errors;

mod distances;
pub use distances::*;

mod tracts;
pub use tracts::{CompactTract, CompactTractChar};

mod coordinates;
pub use coordinates::*;

mod roi;
pub use roi::RoiInfo;

mod store;
pub use store::{FsTractStore, RamTractStore, TractStore};

mod matrix;
pub use matrix::{read_dist_matrix, write_dist_matrix};

/// To make things more obvious, we type the tract index. Leaf tracts are indexed
/// by seed id, node tracts by the id the builder assigned to the merged cluster.
pub type TractIndex = usize;
