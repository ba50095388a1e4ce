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

#![allow(dead_code)]

//! # Hitree
//! Centroid-linkage hierarchical clustering over seed voxel tractograms, restricted
//! to spatial neighborhoods, for connectivity-based parcellation of volumetric
//! regions of interest.
//!
//! ## Parameter Guide
//! The build is controlled mainly by the neighborhood order and the growth policy.
//! The neighborhood order (6, 18, 26, 32, 92 or 124) bounds how many candidate
//! partners any cluster ever compares against, which is what keeps an iteration
//! cheap; higher orders give smoother trees at a higher cost per merge.
//!
//! The growth policy shapes the early "growing" stage, where only small clusters may
//! merge. Stopping it by size or by count fixes the set of base nodes (meta-leaves)
//! that later processing and cross-tree matching preserve. With growth off the build
//! is a plain global agglomeration and base nodes are whatever debinarization leaves.
//!
//! The memory budget sizes the two tract caches; the build degrades gracefully to
//! more store reads when it is small, it never fails for lack of cache.
//!
//! See the git readme for a description of the algo.
//!

#[cfg(test)]
#[macro_use]
extern crate assert_approx_eq;

extern crate rand;

pub use tractcloud::*;

pub mod errors;
pub use errors::HitreeResult;

mod tree;
pub use tree::*;

mod processing;
pub use processing::*;

mod builder;
pub use builder::*;

mod matching;
pub use matching::*;

mod comparison;
pub use comparison::*;

pub mod utils;

/// Leaf and node refs are a tagged index bitpacked into one word; the tag picks the
/// flat array (leaves or nodes), the index addresses into it.
pub use core_hitree::*;
