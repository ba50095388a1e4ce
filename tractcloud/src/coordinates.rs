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

//! Seed voxel coordinates and their spatial neighborhoods.
//!
//! The supported neighborhood orders are the voxel shells 6 / 18 / 26 / 32 and the
//! composed orders 92 and 124. The direct orders enumerate the offsets whose squared
//! euclidean voxel distance is at most 1 / 2 / 3 / 4; the composed orders are built
//! by the caller as two passes of 18 or 26 restricted to seed voxels, which is not
//! the same set as a plain radius-2 shell.

use crate::errors::{TractCloudError, TractCloudResult};
use smallvec::SmallVec;
use std::fmt;

/// Dimensions of the dataset voxel grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GridDims {
    ///
    pub x: usize,
    ///
    pub y: usize,
    ///
    pub z: usize,
}

impl fmt::Display for GridDims {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.x, self.y, self.z)
    }
}

/// An (x,y,z) voxel coordinate in the dataset grid
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SeedCoord {
    ///
    pub x: i32,
    ///
    pub y: i32,
    ///
    pub z: i32,
}

impl fmt::Display for SeedCoord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.x, self.y, self.z)
    }
}

impl SeedCoord {
    ///
    pub fn new(x: i32, y: i32, z: i32) -> SeedCoord {
        SeedCoord { x, y, z }
    }

    /// Euclidean distance on voxel indices
    pub fn phys_dist(&self, other: &SeedCoord) -> f32 {
        let dx = (self.x - other.x) as f32;
        let dy = (self.y - other.y) as f32;
        let dz = (self.z - other.z) as f32;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// The in-grid spatial neighbors of this voxel at a direct neighborhood order
    pub fn phys_neighbors(
        &self,
        dims: GridDims,
        order: u32,
    ) -> TractCloudResult<SmallVec<[SeedCoord; 32]>> {
        let radius_sq = direct_order_radius_sq(order)?;
        let mut nbs = SmallVec::new();
        for dx in -2i32..=2 {
            for dy in -2i32..=2 {
                for dz in -2i32..=2 {
                    let r = dx * dx + dy * dy + dz * dz;
                    if r == 0 || r > radius_sq {
                        continue;
                    }
                    let nb = SeedCoord::new(self.x + dx, self.y + dy, self.z + dz);
                    if nb.x < 0
                        || nb.y < 0
                        || nb.z < 0
                        || nb.x as usize >= dims.x
                        || nb.y as usize >= dims.y
                        || nb.z as usize >= dims.z
                    {
                        continue;
                    }
                    nbs.push(nb);
                }
            }
        }
        Ok(nbs)
    }
}

fn direct_order_radius_sq(order: u32) -> TractCloudResult<i32> {
    match order {
        6 => Ok(1),
        18 => Ok(2),
        26 => Ok(3),
        32 => Ok(4),
        _ => Err(TractCloudError::BadArgument(format!(
            "invalid direct neighborhood order: {}",
            order
        ))),
    }
}

/// Resolves a requested neighborhood order into one or two enumeration passes.
/// Orders 92 and 124 are the two-pass compositions 18∘18 and 26∘26.
pub fn split_order(order: u32) -> TractCloudResult<(u32, u32)> {
    match order {
        6 | 18 | 26 | 32 => Ok((order, 0)),
        92 => Ok((18, 18)),
        124 => Ok((26, 26)),
        _ => Err(TractCloudError::BadArgument(format!(
            "invalid neighborhood order: {} (supported: 6, 18, 26, 32, 92, 124)",
            order
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIMS: GridDims = GridDims { x: 10, y: 10, z: 10 };

    #[test]
    fn direct_order_counts() {
        let center = SeedCoord::new(5, 5, 5);
        for (order, count) in [(6u32, 6usize), (18, 18), (26, 26), (32, 32)] {
            let nbs = center.phys_neighbors(DIMS, order).unwrap();
            println!("order {} gave {} neighbors", order, nbs.len());
            assert_eq!(nbs.len(), count);
        }
    }

    #[test]
    fn grid_edges_are_clipped() {
        let corner = SeedCoord::new(0, 0, 0);
        let nbs = corner.phys_neighbors(DIMS, 6).unwrap();
        assert_eq!(nbs.len(), 3);
        let nbs = corner.phys_neighbors(DIMS, 26).unwrap();
        assert_eq!(nbs.len(), 7);
    }

    #[test]
    fn composed_orders_split() {
        assert_eq!(split_order(92).unwrap(), (18, 18));
        assert_eq!(split_order(124).unwrap(), (26, 26));
        assert_eq!(split_order(6).unwrap(), (6, 0));
        assert!(split_order(7).is_err());
    }

    #[test]
    fn phys_dist_is_euclidean() {
        let a = SeedCoord::new(0, 0, 0);
        let b = SeedCoord::new(3, 4, 0);
        assert!((a.phys_dist(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.phys_dist(&b), b.phys_dist(&a));
    }
}
