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

//! # Proto nodes
//! The builder's working record per live cluster: the dissimilarity map to every
//! still-live neighbor, the pointer to the nearest active one, and the active flag.
//! The map is a `BTreeMap` keyed by `ClusterId`, so traversal order is leaves
//! ascending then nodes ascending, and every tie-break is the same on every run.

use crate::ClusterId;
use std::collections::BTreeMap;
use std::fmt;

/// Sentinel distance for "no active neighbor"
pub(crate) const NO_NB_DIST: f32 = 999.0;

#[derive(Debug, Clone)]
pub(crate) struct ProtoNode {
    pub near_nb: ClusterId,
    pub near_dist: f32,
    pub nbs: BTreeMap<ClusterId, f32>,
    pub active: bool,
    pub discarded: bool,
}

impl ProtoNode {
    /// A live proto node over its neighbor map
    pub(crate) fn new(
        near_nb: ClusterId,
        near_dist: f32,
        nbs: BTreeMap<ClusterId, f32>,
        active: bool,
    ) -> ProtoNode {
        ProtoNode {
            near_nb,
            near_dist,
            nbs,
            active,
            discarded: false,
        }
    }

    /// The record of a seed discarded during initialization
    pub(crate) fn new_discarded() -> ProtoNode {
        ProtoNode {
            near_nb: ClusterId::NONE,
            near_dist: 1.0,
            nbs: BTreeMap::new(),
            active: false,
            discarded: true,
        }
    }

    /// Drops the neighbor map and leaves the frontier
    pub(crate) fn retire(&mut self) {
        self.nbs = BTreeMap::new();
        self.active = false;
        self.near_nb = ClusterId::NONE;
        self.near_dist = NO_NB_DIST;
    }
}

impl fmt::Display for ProtoNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "near {} at {}, {} nbs, active {}",
            self.near_nb,
            self.near_dist,
            self.nbs.len(),
            self.active
        )?;
        for (id, dist) in &self.nbs {
            write!(f, " {}:{}", id, dist)?;
        }
        Ok(())
    }
}

/// The nearest active neighbor in a map: leaves are always active, node activity
/// is read from the proto node table. Ties resolve to the first map entry, which
/// is fixed by the id order.
pub(crate) fn nearest_active(
    nbs: &BTreeMap<ClusterId, f32>,
    proto_nodes: &[ProtoNode],
) -> (ClusterId, f32) {
    let mut best = (ClusterId::NONE, NO_NB_DIST);
    for (id, dist) in nbs {
        let active = if id.is_node() {
            proto_nodes[id.index()].active
        } else {
            true
        };
        if active && *dist < best.1 {
            best = (*id, *dist);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_skips_inactive_nodes() {
        let mut nbs = BTreeMap::new();
        nbs.insert(ClusterId::leaf(4), 0.5);
        nbs.insert(ClusterId::node(0), 0.1);
        nbs.insert(ClusterId::node(1), 0.3);
        let proto_nodes = vec![
            ProtoNode::new(ClusterId::NONE, NO_NB_DIST, BTreeMap::new(), false),
            ProtoNode::new(ClusterId::NONE, NO_NB_DIST, BTreeMap::new(), true),
        ];
        let (nb, dist) = nearest_active(&nbs, &proto_nodes);
        assert_eq!(nb, ClusterId::node(1));
        assert_eq!(dist, 0.3);
    }

    #[test]
    fn empty_map_has_no_neighbor() {
        let (nb, dist) = nearest_active(&BTreeMap::new(), &[]);
        assert!(nb.is_none());
        assert_eq!(dist, NO_NB_DIST);
    }

    #[test]
    fn ties_resolve_to_lowest_id() {
        let mut nbs = BTreeMap::new();
        nbs.insert(ClusterId::leaf(9), 0.25);
        nbs.insert(ClusterId::leaf(2), 0.25);
        let (nb, _) = nearest_active(&nbs, &[]);
        assert_eq!(nb, ClusterId::leaf(2));
    }
}
