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

//! # The Hierarchical Cluster Tree
//! Flat leaf and node vectors plus the coordinate table, with the queries the
//! processors and comparers run on: lowest common ancestor, cophenetic distance,
//! triplet topology, contained leaves and base nodes, cluster mean coordinates.
//!
//! Node indices always grow from children to parents (a merge allocates the next
//! index), and `cleanup()` preserves that, so every bottom-up recomputation is a
//! single ascending scan.

use crate::errors::{HitreeError, HitreeResult};
use crate::tree::node::{Leaf, Node};
use crate::ClusterId;
use fxhash::FxHashSet;
use tractcloud::{GridDims, SeedCoord};

/// Marks a removed element in the remap vectors cleanup hands back.
pub const INVALID_INDEX: usize = usize::MAX;

/// What a cleanup pass did: how much was removed, and how surviving ids moved.
#[derive(Debug, Clone)]
pub struct CleanupReport {
    /// Leaves removed
    pub pruned_leaves: usize,
    /// Nodes removed
    pub pruned_nodes: usize,
    /// Old leaf index to new leaf index, `INVALID_INDEX` where removed
    pub leaf_lookup: Vec<usize>,
    /// Old node index to new node index, `INVALID_INDEX` where removed
    pub node_lookup: Vec<usize>,
}

/// The hierarchical clustering tree over a seed voxel region.
#[derive(Debug, Clone, Default)]
pub struct HcTree {
    /// Mutable tag the processors append to, so written files reflect provenance
    pub tree_name: String,
    /// Name of the dataset grid the coordinates live in
    pub grid: String,
    /// Dataset dimensions in voxels
    pub dims: GridDims,
    /// Streamlines generated per seed during tracking
    pub num_streamlines: usize,
    /// Log-unit normalization factor of the tracts the tree was built on
    pub log_factor: f32,
    /// Cophenetic correlation against the build distances, when it was computed
    pub cpcc: Option<f32>,
    /// Seed coordinates removed before or during the build
    pub discarded: Vec<SeedCoord>,
    pub(crate) leaves: Vec<Leaf>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) coordinates: Vec<SeedCoord>,
    pub(crate) track_ids: Vec<usize>,
    pub(crate) comments: Vec<String>,
}

impl HcTree {
    /// Assembles a tree from parts the builder or a reader produced. Run `check()`
    /// before trusting it.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        tree_name: String,
        grid: String,
        dims: GridDims,
        num_streamlines: usize,
        log_factor: f32,
        leaves: Vec<Leaf>,
        nodes: Vec<Node>,
        coordinates: Vec<SeedCoord>,
        track_ids: Vec<usize>,
        discarded: Vec<SeedCoord>,
    ) -> HcTree {
        HcTree {
            tree_name,
            grid,
            dims,
            num_streamlines,
            log_factor,
            cpcc: None,
            discarded,
            leaves,
            nodes,
            coordinates,
            track_ids,
            comments: Vec::new(),
        }
    }

    // === accessors ===

    ///
    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    ///
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    ///
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    ///
    pub fn leaf(&self, index: usize) -> HitreeResult<&Leaf> {
        self.leaves.get(index).ok_or(HitreeError::IdNotInTree(index))
    }

    ///
    pub fn node(&self, index: usize) -> HitreeResult<&Node> {
        self.nodes.get(index).ok_or(HitreeError::IdNotInTree(index))
    }

    ///
    pub fn leaves(&self) -> &[Leaf] {
        &self.leaves
    }

    ///
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    ///
    pub fn coordinates(&self) -> &[SeedCoord] {
        &self.coordinates
    }

    ///
    pub fn track_ids(&self) -> &[usize] {
        &self.track_ids
    }

    /// The root is always the highest-index node
    pub fn root(&self) -> HitreeResult<&Node> {
        self.nodes
            .last()
            .ok_or(HitreeError::Precondition("tree holds no nodes"))
    }

    pub(crate) fn fetch_leaf(&mut self, index: usize) -> HitreeResult<&mut Leaf> {
        self.leaves
            .get_mut(index)
            .ok_or(HitreeError::IdNotInTree(index))
    }

    pub(crate) fn fetch_node(&mut self, index: usize) -> HitreeResult<&mut Node> {
        self.nodes
            .get_mut(index)
            .ok_or(HitreeError::IdNotInTree(index))
    }

    /// Parent of any element
    pub fn parent_of(&self, id: ClusterId) -> HitreeResult<ClusterId> {
        if id.is_node() {
            Ok(self.node(id.index())?.parent)
        } else {
            Ok(self.leaf(id.index())?.parent)
        }
    }

    /// Contained leaf count of any element
    pub fn size_of(&self, id: ClusterId) -> HitreeResult<usize> {
        if id.is_node() {
            Ok(self.node(id.index())?.size)
        } else {
            self.leaf(id.index())?;
            Ok(1)
        }
    }

    /// Distance level of any element, zero for leaves
    pub fn level_of(&self, id: ClusterId) -> HitreeResult<f32> {
        if id.is_node() {
            Ok(self.node(id.index())?.level)
        } else {
            self.leaf(id.index())?;
            Ok(0.0)
        }
    }

    /// Hierarchical level of any element, zero for leaves
    pub fn hlevel_of(&self, id: ClusterId) -> HitreeResult<usize> {
        if id.is_node() {
            Ok(self.node(id.index())?.hlevel)
        } else {
            self.leaf(id.index())?;
            Ok(0)
        }
    }

    /// Pending-deletion flag of any element
    pub fn flag_of(&self, id: ClusterId) -> HitreeResult<bool> {
        if id.is_node() {
            Ok(self.node(id.index())?.flag)
        } else {
            Ok(self.leaf(id.index())?.flag)
        }
    }

    pub(crate) fn set_flag(&mut self, id: ClusterId, flag: bool) -> HitreeResult<()> {
        if id.is_node() {
            self.fetch_node(id.index())?.flag = flag;
        } else {
            self.fetch_leaf(id.index())?.flag = flag;
        }
        Ok(())
    }

    // === structural queries ===

    /// The lowest common ancestor node of two elements. An element that is itself
    /// an ancestor of the other is its own answer.
    pub fn common_ancestor(&self, a: ClusterId, b: ClusterId) -> HitreeResult<usize> {
        let mut chain_a = FxHashSet::default();
        let mut current = a;
        if !current.is_node() {
            current = self.parent_of(current)?;
        }
        while !current.is_none() {
            chain_a.insert(current.index());
            current = self.node(current.index())?.parent;
        }
        let mut current = b;
        if !current.is_node() {
            current = self.parent_of(current)?;
        }
        while !current.is_none() {
            if chain_a.contains(&current.index()) {
                return Ok(current.index());
            }
            current = self.node(current.index())?.parent;
        }
        Err(HitreeError::Corruption(format!(
            "{} and {} share no ancestor",
            a, b
        )))
    }

    /// Cophenetic distance: the distance level of the lowest common ancestor
    pub fn distance(&self, a: ClusterId, b: ClusterId) -> HitreeResult<f32> {
        if a == b {
            return Ok(0.0);
        }
        let lca = self.common_ancestor(a, b)?;
        Ok(self.nodes[lca].level)
    }

    /// Cophenetic distance between two leaves
    pub fn leaf_distance(&self, i: usize, j: usize) -> HitreeResult<f32> {
        self.distance(ClusterId::leaf(i), ClusterId::leaf(j))
    }

    /// The triplet topology of three elements: 1, 2 or 3 for whichever pair
    /// (a,b), (a,c) or (b,c) meets strictly first when climbing, 0 when no pair
    /// does (a star join).
    pub fn triplet_order(
        &self,
        a: ClusterId,
        b: ClusterId,
        c: ClusterId,
    ) -> HitreeResult<u8> {
        let d_ab = self.distance(a, b)?;
        let d_ac = self.distance(a, c)?;
        let d_bc = self.distance(b, c)?;
        if d_ab < d_ac && d_ab < d_bc {
            Ok(1)
        } else if d_ac < d_ab && d_ac < d_bc {
            Ok(2)
        } else if d_bc < d_ab && d_bc < d_ac {
            Ok(3)
        } else {
            Ok(0)
        }
    }

    /// Indices of all leaves contained under an element, in discovery order
    pub fn leaves_under(&self, id: ClusterId) -> HitreeResult<Vec<usize>> {
        let mut found = Vec::new();
        let mut worklist = vec![id];
        while let Some(current) = worklist.pop() {
            if current.is_node() {
                let node = self.node(current.index())?;
                worklist.extend(node.children.iter().rev());
            } else {
                self.leaf(current.index())?;
                found.push(current.index());
            }
        }
        Ok(found)
    }

    /// Indices of all nodes of the sub-branch rooted at a node, the root included,
    /// in pre-order
    pub fn nodes_under(&self, index: usize) -> HitreeResult<Vec<usize>> {
        let mut found = Vec::new();
        let mut worklist = vec![index];
        while let Some(current) = worklist.pop() {
            found.push(current);
            for kid in &self.node(current)?.children {
                if kid.is_node() {
                    worklist.push(kid.index());
                }
            }
        }
        Ok(found)
    }

    /// Indices of the base nodes (hLevel one) contained under a node
    pub fn base_nodes_under(&self, index: usize) -> HitreeResult<Vec<usize>> {
        let mut found: Vec<usize> = self
            .nodes_under(index)?
            .into_iter()
            .filter(|n| self.nodes[*n].hlevel == 1)
            .collect();
        found.sort_unstable();
        Ok(found)
    }

    /// The base nodes under the root
    pub fn root_base_nodes(&self) -> HitreeResult<Vec<usize>> {
        let root_index = self.nodes.len().checked_sub(1).ok_or(
            HitreeError::Precondition("tree holds no nodes"),
        )?;
        self.base_nodes_under(root_index)
    }

    /// True when every leaf hangs from a base node, the shape matching and
    /// comparison require
    pub fn is_base_node_tree(&self) -> bool {
        self.leaves.iter().all(|leaf| {
            leaf.parent.is_node()
                && self
                    .nodes
                    .get(leaf.parent.index())
                    .map(|n| n.hlevel == 1)
                    .unwrap_or(false)
        })
    }

    /// Equal-weight mean coordinate of the leaves contained under an element
    pub fn mean_coordinate(&self, id: ClusterId) -> HitreeResult<(f32, f32, f32)> {
        let contained = self.leaves_under(id)?;
        if contained.is_empty() {
            return Err(HitreeError::Precondition(
                "mean coordinate of an empty cluster",
            ));
        }
        let mut sum = (0f64, 0f64, 0f64);
        for leaf_index in &contained {
            let coord = &self.coordinates[*leaf_index];
            sum.0 += coord.x as f64;
            sum.1 += coord.y as f64;
            sum.2 += coord.z as f64;
        }
        let count = contained.len() as f64;
        Ok((
            (sum.0 / count) as f32,
            (sum.1 / count) as f32,
            (sum.2 / count) as f32,
        ))
    }

    // === invariants ===

    /// Validates the structural invariants: every non-root element has exactly one
    /// resolving parent that lists it as a child, children lists are non-empty and
    /// child indices precede their parent, sizes are additive and hLevels are one
    /// above the deepest child.
    pub fn check(&self) -> HitreeResult<()> {
        if self.leaves.is_empty() {
            return Err(HitreeError::Corruption("tree holds no leaves".to_string()));
        }
        if self.coordinates.len() != self.leaves.len() {
            return Err(HitreeError::Corruption(format!(
                "{} coordinates for {} leaves",
                self.coordinates.len(),
                self.leaves.len()
            )));
        }
        for (index, leaf) in self.leaves.iter().enumerate() {
            if leaf.id != ClusterId::leaf(index) {
                return Err(HitreeError::Corruption(format!(
                    "leaf {} carries id {}",
                    index, leaf.id
                )));
            }
            if self.nodes.is_empty() {
                continue;
            }
            if !leaf.parent.is_node() || leaf.parent.index() >= self.nodes.len() {
                return Err(HitreeError::Corruption(format!(
                    "leaf {} has unresolved parent {}",
                    index, leaf.parent
                )));
            }
            if !self.nodes[leaf.parent.index()].children.contains(&leaf.id) {
                return Err(HitreeError::Corruption(format!(
                    "leaf {} is not a child of its parent {}",
                    index, leaf.parent
                )));
            }
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if node.id != ClusterId::node(index) {
                return Err(HitreeError::Corruption(format!(
                    "node {} carries id {}",
                    index, node.id
                )));
            }
            if node.children.is_empty() {
                return Err(HitreeError::Corruption(format!(
                    "node {} has no children",
                    index
                )));
            }
            let mut size = 0;
            let mut max_hlevel = 0;
            for kid in &node.children {
                if kid.is_node() {
                    if kid.index() >= index {
                        return Err(HitreeError::Corruption(format!(
                            "node {} lists non-prior child {}",
                            index, kid
                        )));
                    }
                    let child = &self.nodes[kid.index()];
                    if child.parent != node.id {
                        return Err(HitreeError::Corruption(format!(
                            "child {} does not point back at node {}",
                            kid, index
                        )));
                    }
                    size += child.size;
                    max_hlevel = max_hlevel.max(child.hlevel);
                } else {
                    if kid.index() >= self.leaves.len() {
                        return Err(HitreeError::Corruption(format!(
                            "node {} lists unresolved child {}",
                            index, kid
                        )));
                    }
                    if self.leaves[kid.index()].parent != node.id {
                        return Err(HitreeError::Corruption(format!(
                            "child {} does not point back at node {}",
                            kid, index
                        )));
                    }
                    size += 1;
                }
            }
            if size != node.size {
                return Err(HitreeError::Corruption(format!(
                    "node {} claims size {} but children sum to {}",
                    index, node.size, size
                )));
            }
            if max_hlevel + 1 != node.hlevel {
                return Err(HitreeError::Corruption(format!(
                    "node {} claims hlevel {} but children peak at {}",
                    index, node.hlevel, max_hlevel
                )));
            }
            let is_last = index + 1 == self.nodes.len();
            if is_last != node.parent.is_none() {
                return Err(HitreeError::Corruption(format!(
                    "node {} parent {} breaks the single-root shape",
                    index, node.parent
                )));
            }
            if !node.parent.is_none() && node.parent.index() >= self.nodes.len() {
                return Err(HitreeError::Corruption(format!(
                    "node {} has unresolved parent {}",
                    index, node.parent
                )));
            }
        }
        Ok(())
    }

    // === cleanup ===

    /// Removes every flagged leaf and node plus any subtree left empty, reattaches
    /// surviving elements to their nearest kept ancestor, compacts the id space and
    /// rebuilds sizes and hierarchical levels. Distance levels are untouched.
    /// Single-child nodes are kept as they are.
    pub fn cleanup(&mut self) -> CleanupReport {
        let keep_leaf: Vec<bool> = self.leaves.iter().map(|l| !l.flag).collect();

        // whether any kept leaf survives somewhere under each node
        let mut has_kept = vec![false; self.nodes.len()];
        let mut keep_node = vec![false; self.nodes.len()];
        for index in 0..self.nodes.len() {
            let mut any = false;
            for kid in &self.nodes[index].children {
                any |= if kid.is_node() {
                    has_kept[kid.index()]
                } else {
                    keep_leaf[kid.index()]
                };
            }
            has_kept[index] = any;
            keep_node[index] = any && !self.nodes[index].flag;
        }

        let mut leaf_lookup = vec![INVALID_INDEX; self.leaves.len()];
        let mut node_lookup = vec![INVALID_INDEX; self.nodes.len()];
        let mut next = 0;
        for (index, kept) in keep_leaf.iter().enumerate() {
            if *kept {
                leaf_lookup[index] = next;
                next += 1;
            }
        }
        let mut next = 0;
        for (index, kept) in keep_node.iter().enumerate() {
            if *kept {
                node_lookup[index] = next;
                next += 1;
            }
        }

        // nearest kept ancestor in the old id space
        let kept_ancestor = |nodes: &[Node], mut parent: ClusterId| -> ClusterId {
            while !parent.is_none() {
                if keep_node[parent.index()] {
                    return parent;
                }
                parent = nodes[parent.index()].parent;
            }
            ClusterId::NONE
        };

        let mut new_leaves: Vec<Leaf> = Vec::with_capacity(self.leaves.len());
        let mut new_coordinates = Vec::with_capacity(self.leaves.len());
        let mut new_track_ids = Vec::with_capacity(self.track_ids.len());
        for (index, leaf) in self.leaves.iter().enumerate() {
            if !keep_leaf[index] {
                self.discarded.push(self.coordinates[index]);
                continue;
            }
            let parent = kept_ancestor(&self.nodes, leaf.parent);
            let mut new_leaf = Leaf::new(leaf_lookup[index]);
            new_leaf.parent = parent
                .to_pair()
                .map(|(_, i)| ClusterId::node(node_lookup[i]))
                .unwrap_or(ClusterId::NONE);
            new_leaves.push(new_leaf);
            new_coordinates.push(self.coordinates[index]);
            if let Some(track_id) = self.track_ids.get(index) {
                new_track_ids.push(*track_id);
            }
        }

        let mut new_nodes: Vec<Node> = Vec::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            if !keep_node[index] {
                continue;
            }
            let parent = kept_ancestor(&self.nodes, node.parent);
            let mut new_node = Node::new(
                node_lookup[index],
                smallvec::SmallVec::new(),
                0,
                node.level,
                0,
            );
            new_node.parent = parent
                .to_pair()
                .map(|(_, i)| ClusterId::node(node_lookup[i]))
                .unwrap_or(ClusterId::NONE);
            new_nodes.push(new_node);
        }

        // children rebuilt from the parent pointers, leaves first then nodes
        for leaf in &new_leaves {
            if !leaf.parent.is_none() {
                new_nodes[leaf.parent.index()].children.push(leaf.id);
            }
        }
        for index in 0..new_nodes.len() {
            let parent = new_nodes[index].parent;
            if !parent.is_none() {
                let id = new_nodes[index].id;
                new_nodes[parent.index()].children.push(id);
            }
        }

        // sizes and hlevels bottom-up; child indices still precede parents
        for index in 0..new_nodes.len() {
            let mut size = 0;
            let mut max_hlevel = 0;
            for kid_pos in 0..new_nodes[index].children.len() {
                let kid = new_nodes[index].children[kid_pos];
                if kid.is_node() {
                    size += new_nodes[kid.index()].size;
                    max_hlevel = max_hlevel.max(new_nodes[kid.index()].hlevel);
                } else {
                    size += 1;
                }
            }
            new_nodes[index].size = size;
            new_nodes[index].hlevel = max_hlevel + 1;
        }

        let report = CleanupReport {
            pruned_leaves: self.leaves.len() - new_leaves.len(),
            pruned_nodes: self.nodes.len() - new_nodes.len(),
            leaf_lookup,
            node_lookup,
        };

        self.leaves = new_leaves;
        self.nodes = new_nodes;
        self.coordinates = new_coordinates;
        self.track_ids = new_track_ids;
        report
    }

    // === misc ===

    /// Mirrors every coordinate in the x axis of the dataset grid, for comparing
    /// right-hemisphere trees against left-hemisphere ones
    pub fn flip_x(&mut self) {
        let max_x = self.dims.x as i32 - 1;
        for coord in self.coordinates.iter_mut() {
            coord.x = max_x - coord.x;
        }
        for coord in self.discarded.iter_mut() {
            coord.x = max_x - coord.x;
        }
    }

    /// A one-paragraph summary for logs
    pub fn report(&self, with_name: bool) -> String {
        let base_count = self.root_base_nodes().map(|b| b.len()).unwrap_or(0);
        let depth = self.nodes.last().map(|n| n.hlevel).unwrap_or(0);
        let branching: f64 = if self.nodes.is_empty() {
            0.0
        } else {
            self.nodes.iter().map(|n| n.children.len()).sum::<usize>() as f64
                / self.nodes.len() as f64
        };
        let mut message = String::new();
        if with_name {
            message.push_str(&format!("Tree \"{}\": ", self.tree_name));
        }
        message.push_str(&format!(
            "{} leaves, {} nodes, {} base nodes, depth {}, mean branching {:.2}, {} discarded",
            self.leaves.len(),
            self.nodes.len(),
            base_count,
            depth,
            branching,
            self.discarded.len()
        ));
        message
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use smallvec::smallvec;

    /// Four leaves, two base nodes at levels 0.1 / 0.2, a root at 0.5:
    ///   n2(0.5) -> n0(0.1){l0,l1}, n1(0.2){l2,l3}
    pub(crate) fn two_base_tree() -> HcTree {
        let mut leaves: Vec<Leaf> = (0..4).map(Leaf::new).collect();
        let mut n0 = Node::new(0, smallvec![ClusterId::leaf(0), ClusterId::leaf(1)], 2, 0.1, 1);
        let mut n1 = Node::new(1, smallvec![ClusterId::leaf(2), ClusterId::leaf(3)], 2, 0.2, 1);
        let n2 = Node::new(2, smallvec![ClusterId::node(0), ClusterId::node(1)], 4, 0.5, 2);
        leaves[0].parent = ClusterId::node(0);
        leaves[1].parent = ClusterId::node(0);
        leaves[2].parent = ClusterId::node(1);
        leaves[3].parent = ClusterId::node(1);
        n0.parent = ClusterId::node(2);
        n1.parent = ClusterId::node(2);
        let coordinates = vec![
            SeedCoord::new(0, 0, 0),
            SeedCoord::new(1, 0, 0),
            SeedCoord::new(2, 0, 0),
            SeedCoord::new(3, 0, 0),
        ];
        HcTree::from_parts(
            "test".to_string(),
            "mni".to_string(),
            GridDims { x: 4, y: 1, z: 1 },
            0,
            0.0,
            leaves,
            vec![n0, n1, n2],
            coordinates,
            vec![0, 1, 2, 3],
            Vec::new(),
        )
    }

    #[test]
    fn check_passes_on_valid_tree() {
        let tree = two_base_tree();
        tree.check().unwrap();
    }

    #[test]
    fn check_catches_size_violation() {
        let mut tree = two_base_tree();
        tree.nodes[2].size = 5;
        assert!(tree.check().is_err());
    }

    #[test]
    fn check_catches_dangling_parent() {
        let mut tree = two_base_tree();
        tree.leaves[0].parent = ClusterId::node(7);
        assert!(tree.check().is_err());
    }

    #[test]
    fn cophenetic_distances() {
        let tree = two_base_tree();
        assert_eq!(tree.leaf_distance(0, 1).unwrap(), 0.1);
        assert_eq!(tree.leaf_distance(2, 3).unwrap(), 0.2);
        assert_eq!(tree.leaf_distance(0, 3).unwrap(), 0.5);
        assert_eq!(
            tree.distance(ClusterId::node(0), ClusterId::node(1)).unwrap(),
            0.5
        );
        assert_eq!(
            tree.distance(ClusterId::leaf(0), ClusterId::node(0)).unwrap(),
            0.1
        );
    }

    #[test]
    fn triplet_topologies() {
        let tree = two_base_tree();
        // l0 and l1 meet at 0.1, both meet l2 at the root
        assert_eq!(
            tree.triplet_order(ClusterId::leaf(0), ClusterId::leaf(1), ClusterId::leaf(2))
                .unwrap(),
            1
        );
        assert_eq!(
            tree.triplet_order(ClusterId::leaf(0), ClusterId::leaf(2), ClusterId::leaf(1))
                .unwrap(),
            2
        );
        assert_eq!(
            tree.triplet_order(ClusterId::leaf(2), ClusterId::leaf(0), ClusterId::leaf(1))
                .unwrap(),
            3
        );
    }

    #[test]
    fn base_node_queries() {
        let tree = two_base_tree();
        assert_eq!(tree.root_base_nodes().unwrap(), vec![0, 1]);
        assert!(tree.is_base_node_tree());
        assert_eq!(tree.leaves_under(ClusterId::node(2)).unwrap().len(), 4);
        assert_eq!(tree.leaves_under(ClusterId::node(1)).unwrap(), vec![2, 3]);
    }

    #[test]
    fn mean_coordinates() {
        let tree = two_base_tree();
        let (x, y, z) = tree.mean_coordinate(ClusterId::node(0)).unwrap();
        assert_eq!((x, y, z), (0.5, 0.0, 0.0));
        let (x, _, _) = tree.mean_coordinate(ClusterId::node(2)).unwrap();
        assert_eq!(x, 1.5);
    }

    #[test]
    fn cleanup_prunes_flagged_leaf() {
        let mut tree = two_base_tree();
        tree.set_flag(ClusterId::leaf(3), true).unwrap();
        let report = tree.cleanup();
        assert_eq!(report.pruned_leaves, 1);
        assert_eq!(report.pruned_nodes, 0);
        assert_eq!(tree.num_leaves(), 3);
        assert_eq!(tree.nodes[1].size, 1);
        assert_eq!(tree.nodes[2].size, 3);
        tree.check().unwrap();
        assert_eq!(tree.discarded.len(), 1);
    }

    #[test]
    fn cleanup_removes_emptied_subtree() {
        let mut tree = two_base_tree();
        tree.set_flag(ClusterId::leaf(2), true).unwrap();
        tree.set_flag(ClusterId::leaf(3), true).unwrap();
        let report = tree.cleanup();
        assert_eq!(report.pruned_leaves, 2);
        assert_eq!(report.pruned_nodes, 1);
        assert_eq!(report.node_lookup[1], INVALID_INDEX);
        assert_eq!(report.node_lookup[2], 1);
        assert_eq!(tree.num_nodes(), 2);
        tree.check().unwrap();
    }

    #[test]
    fn cleanup_reattaches_to_kept_ancestor() {
        let mut tree = two_base_tree();
        // flattening: remove the internal node, keep its leaves
        tree.set_flag(ClusterId::node(0), true).unwrap();
        let report = tree.cleanup();
        assert_eq!(report.pruned_leaves, 0);
        assert_eq!(report.pruned_nodes, 1);
        assert_eq!(tree.leaves[0].parent, ClusterId::node(1));
        assert_eq!(tree.leaves[1].parent, ClusterId::node(1));
        assert_eq!(tree.num_nodes(), 2);
        tree.check().unwrap();
        // leaf multiset preserved
        assert_eq!(tree.num_leaves(), 4);
    }

    #[test]
    fn flip_x_mirrors_coordinates() {
        let mut tree = two_base_tree();
        tree.flip_x();
        assert_eq!(tree.coordinates[0], SeedCoord::new(3, 0, 0));
        assert_eq!(tree.coordinates[3], SeedCoord::new(0, 0, 0));
    }
}
