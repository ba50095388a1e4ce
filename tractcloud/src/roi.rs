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

//! The seed region of interest: dataset grid identity, seed voxel coordinates and
//! the per-seed track ids linking coordinates to tract files.

use crate::coordinates::{GridDims, SeedCoord};
use crate::errors::{TractCloudError, TractCloudResult};
use fxhash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Everything the engine needs to know about the seed region before it touches a tract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoiInfo {
    /// Name of the dataset grid the coordinates live in
    pub grid: String,
    /// Dataset dimensions in voxels
    pub dims: GridDims,
    /// Streamlines generated per seed during tracking, zero means natural-unit tracts
    pub num_streamlines: usize,
    /// One coordinate per seed voxel
    pub seeds: Vec<SeedCoord>,
    /// Per-seed id linking the coordinate to its tract file
    pub track_ids: Vec<usize>,
}

impl RoiInfo {
    /// Reads a roi file. Tagged text: `#grid`, `#size`, `#streams`, then one
    /// `x y z trackid` line per seed under `#seeds`, closed by `#end`.
    pub fn read<P: AsRef<Path>>(path: P) -> TractCloudResult<RoiInfo> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut roi = RoiInfo::default();
        let mut section = String::new();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('#') {
                section = trimmed.to_string();
                continue;
            }
            let parse = |reason: &str| TractCloudError::ParsingError {
                line: line_num + 1,
                reason: reason.to_string(),
            };
            match section.as_str() {
                "#grid" => roi.grid = trimmed.to_string(),
                "#size" => {
                    let dims: Vec<usize> = trimmed
                        .split_whitespace()
                        .map(|t| t.parse())
                        .collect::<Result<_, _>>()
                        .map_err(|_| parse("three grid dimensions"))?;
                    if dims.len() != 3 {
                        return Err(parse("three grid dimensions"));
                    }
                    roi.dims = GridDims {
                        x: dims[0],
                        y: dims[1],
                        z: dims[2],
                    };
                }
                "#streams" => {
                    roi.num_streamlines =
                        trimmed.parse().map_err(|_| parse("a streamline count"))?;
                }
                "#seeds" => {
                    let fields: Vec<i64> = trimmed
                        .split_whitespace()
                        .map(|t| t.parse())
                        .collect::<Result<_, _>>()
                        .map_err(|_| parse("x y z trackid"))?;
                    if fields.len() != 4 {
                        return Err(parse("x y z trackid"));
                    }
                    roi.seeds.push(SeedCoord::new(
                        fields[0] as i32,
                        fields[1] as i32,
                        fields[2] as i32,
                    ));
                    roi.track_ids.push(fields[3] as usize);
                }
                _ => {}
            }
        }
        if roi.seeds.is_empty() {
            return Err(TractCloudError::ParsingError {
                line: 0,
                reason: "roi file holds no seed voxels".to_string(),
            });
        }
        Ok(roi)
    }

    /// Lookup from a seed coordinate to its index, used by the neighborhood scans
    pub fn coord_map(&self) -> FxHashMap<SeedCoord, usize> {
        self.seeds
            .iter()
            .enumerate()
            .map(|(i, c)| (*c, i))
            .collect()
    }

    /// Writes the roi file in the format `read` expects.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> TractCloudResult<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "#grid")?;
        writeln!(writer, "{}", self.grid)?;
        writeln!(writer, "#size")?;
        writeln!(writer, "{}", self.dims)?;
        writeln!(writer, "#streams")?;
        writeln!(writer, "{}", self.num_streamlines)?;
        writeln!(writer, "#seeds")?;
        for (coord, track_id) in self.seeds.iter().zip(&self.track_ids) {
            writeln!(writer, "{} {}", coord, track_id)?;
        }
        writeln!(writer, "#end")?;
        Ok(())
    }
}
