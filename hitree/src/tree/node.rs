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

//! # Leaf and node records
//! Both live in flat vectors on the tree; every cross reference is a `ClusterId`
//! (a tagged index), never a pointer, so cleanup passes can compact the id space
//! and hand a remap vector to whoever still holds old ids.

use crate::ClusterId;
use smallvec::SmallVec;
use std::fmt;

/// A seed voxel of the region of interest. Its coordinate lives in the tree's
/// coordinate table at the same index. Size is one and level zero by definition.
#[derive(Debug, Clone)]
pub struct Leaf {
    pub(crate) id: ClusterId,
    pub(crate) parent: ClusterId,
    pub(crate) flag: bool,
}

impl Leaf {
    /// A parentless leaf
    pub fn new(index: usize) -> Leaf {
        Leaf {
            id: ClusterId::leaf(index),
            parent: ClusterId::NONE,
            flag: false,
        }
    }

    ///
    pub fn id(&self) -> ClusterId {
        self.id
    }

    ///
    pub fn parent(&self) -> ClusterId {
        self.parent
    }

    /// The pending-deletion flag cleanup passes honor
    pub fn is_flagged(&self) -> bool {
        self.flag
    }
}

/// An internal cluster created by a merge event. The distance level is the
/// dissimilarity its children were merged at; the hierarchical level is one more
/// than the deepest child.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: ClusterId,
    pub(crate) parent: ClusterId,
    pub(crate) children: SmallVec<[ClusterId; 8]>,
    pub(crate) size: usize,
    pub(crate) level: f32,
    pub(crate) hlevel: usize,
    pub(crate) flag: bool,
}

impl Node {
    /// A new internal node over the given children
    pub fn new(
        index: usize,
        children: SmallVec<[ClusterId; 8]>,
        size: usize,
        level: f32,
        hlevel: usize,
    ) -> Node {
        Node {
            id: ClusterId::node(index),
            parent: ClusterId::NONE,
            children,
            size,
            level,
            hlevel,
            flag: false,
        }
    }

    ///
    pub fn id(&self) -> ClusterId {
        self.id
    }

    ///
    pub fn parent(&self) -> ClusterId {
        self.parent
    }

    ///
    pub fn children(&self) -> &[ClusterId] {
        &self.children
    }

    /// Number of leaves contained under this node
    pub fn size(&self) -> usize {
        self.size
    }

    /// The dissimilarity this node's children were merged at
    pub fn level(&self) -> f32 {
        self.level
    }

    /// One more than the deepest child's hierarchical level; one for base nodes
    pub fn hlevel(&self) -> usize {
        self.hlevel
    }

    /// A base node (meta-leaf) has only leaves as children
    pub fn is_base(&self) -> bool {
        self.hlevel == 1
    }

    /// True for the node without a parent
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// The pending-deletion flag cleanup passes honor
    pub fn is_flagged(&self) -> bool {
        self.flag
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} parent {} level {} size {} hlevel {} kids:",
            self.id, self.parent, self.level, self.size, self.hlevel
        )?;
        for kid in &self.children {
            write!(f, " {}", kid)?;
        }
        Ok(())
    }
}
