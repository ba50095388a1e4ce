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

//! # Tract stores
//! A store maps leaf and node ids to compact tracts. The clustering engine only ever
//! talks to the `TractStore` trait; the two implementations here cover the on-disk
//! layout (one little-endian file per tract, optionally gzipped) and an in-RAM store
//! for tests and small runs.
//!
//! Every node tract file has a single writer, the merge event that produced it, so
//! writes never race; deletes are best effort and scheduled by the caller.

use crate::errors::{TractCloudError, TractCloudResult};
use crate::tracts::{CompactTract, CompactTractChar};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hashbrown::HashMap;
use std::convert::TryInto;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const TRACT_MAGIC: &[u8; 4] = b"CTCT";
const DTYPE_F32: u8 = 0;
const DTYPE_U8: u8 = 1;
const FLAG_LOG: u8 = 0b01;
const FLAG_THRESHOLDED: u8 = 0b10;

/// The access interface the clustering engine consumes. Leaf tracts are read-only
/// and live in log units; node tracts are written once per merge and read back in
/// whatever representation they were stored in.
pub trait TractStore: Send + Sync {
    /// A leaf tract in byte-compressed log units
    fn read_leaf_tract(&self, id: usize) -> TractCloudResult<CompactTractChar>;
    /// A leaf tract expanded to f32
    fn read_leaf_tract_float(&self, id: usize) -> TractCloudResult<CompactTract>;
    /// A node tract, flags restored to what the writer stored
    fn read_node_tract(&self, id: usize) -> TractCloudResult<CompactTract>;
    /// Stores a node tract. Idempotent by id, a rewrite replaces the old payload.
    fn write_node_tract(&self, id: usize, tract: &CompactTract) -> TractCloudResult<()>;
    /// Removes a node tract. Best effort, a missing file is not an error.
    fn delete_node_tract(&self, id: usize) -> TractCloudResult<()>;
}

// ---------------------------------------------------------------------------------
// on-disk store

/// One file per tract under a folder, `leaf_<id>.ctv` / `node_<id>.ctv`, gzipped
/// when the zip flag is set. The payload round-trips exactly in its stored dtype.
#[derive(Debug)]
pub struct FsTractStore {
    folder: PathBuf,
    zipped: bool,
}

impl FsTractStore {
    /// A store over the given folder, writing unzipped
    pub fn new<P: AsRef<Path>>(folder: P) -> FsTractStore {
        FsTractStore {
            folder: folder.as_ref().to_path_buf(),
            zipped: false,
        }
    }

    /// Toggles gzip on written files. Reads always accept both forms.
    pub fn store_zipped(&mut self, zipped: bool) -> &mut Self {
        self.zipped = zipped;
        self
    }

    ///
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn tract_path(&self, prefix: &str, id: usize, zipped: bool) -> PathBuf {
        let name = if zipped {
            format!("{}_{}.ctv.gz", prefix, id)
        } else {
            format!("{}_{}.ctv", prefix, id)
        };
        self.folder.join(name)
    }

    fn open_tract(&self, prefix: &str, id: usize) -> TractCloudResult<Vec<u8>> {
        let plain = self.tract_path(prefix, id, false);
        let gz = self.tract_path(prefix, id, true);
        let path = if plain.exists() {
            plain
        } else if gz.exists() {
            gz
        } else {
            return Err(TractCloudError::DataAccessError {
                index: id,
                reason: format!("no {} tract file under {:?}", prefix, self.folder),
            });
        };
        let mut raw = Vec::new();
        File::open(&path)?.read_to_end(&mut raw)?;
        if raw.starts_with(&[0x1f, 0x8b]) {
            let mut decoded = Vec::new();
            GzDecoder::new(&raw[..]).read_to_end(&mut decoded)?;
            raw = decoded;
        }
        Ok(raw)
    }

    fn parse_header(id: usize, raw: &[u8]) -> TractCloudResult<(u8, u8, usize)> {
        let access = |reason: &str| TractCloudError::DataAccessError {
            index: id,
            reason: reason.to_string(),
        };
        if raw.len() < 15 || &raw[0..4] != TRACT_MAGIC {
            return Err(access("not a compact tract file"));
        }
        if raw[4] != 1 {
            return Err(access("unknown tract file version"));
        }
        let dtype = raw[5];
        let flags = raw[6];
        let len = u64::from_le_bytes(raw[7..15].try_into().unwrap()) as usize;
        let elem = if dtype == DTYPE_F32 { 4 } else { 1 };
        if raw.len() != 15 + len * elem {
            return Err(access("truncated tract file"));
        }
        Ok((dtype, flags, len))
    }

    fn read_raw(&self, prefix: &str, id: usize) -> TractCloudResult<(u8, u8, Vec<u8>)> {
        let raw = self.open_tract(prefix, id)?;
        let (dtype, flags, len) = FsTractStore::parse_header(id, &raw)?;
        let payload = raw[15..15 + len * if dtype == DTYPE_F32 { 4 } else { 1 }].to_vec();
        Ok((dtype, flags, payload))
    }

    fn read_float(&self, prefix: &str, id: usize) -> TractCloudResult<CompactTract> {
        let (dtype, flags, payload) = self.read_raw(prefix, id)?;
        let values: Vec<f32> = match dtype {
            DTYPE_F32 => payload
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
                .collect(),
            _ => payload.iter().map(|v| *v as f32 / 255.0).collect(),
        };
        let mut tract = CompactTract::new(values);
        tract.restore_flags(
            flags & FLAG_LOG != 0 || dtype == DTYPE_U8,
            flags & FLAG_THRESHOLDED != 0,
        );
        Ok(tract)
    }

    fn write_payload(&self, path: &Path, header: &[u8], payload: &[u8]) -> TractCloudResult<()> {
        if self.zipped {
            let file = File::create(path)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(header)?;
            encoder.write_all(payload)?;
            encoder.finish()?;
        } else {
            let mut file = File::create(path)?;
            file.write_all(header)?;
            file.write_all(payload)?;
        }
        Ok(())
    }

    /// Writes a leaf tract file from the byte form, the layout leaf stores are built with
    pub fn write_leaf_tract(&self, id: usize, tract: &CompactTractChar) -> TractCloudResult<()> {
        let mut header = Vec::with_capacity(15);
        header.extend_from_slice(TRACT_MAGIC);
        header.push(1);
        header.push(DTYPE_U8);
        let mut flags = FLAG_LOG;
        if tract.is_thresholded() {
            flags |= FLAG_THRESHOLDED;
        }
        header.push(flags);
        header.extend_from_slice(&(tract.len() as u64).to_le_bytes());
        let path = self.tract_path("leaf", id, self.zipped);
        self.write_payload(&path, &header, tract.values())
    }

    /// Writes a leaf tract file in f32 form, used by natural-unit (no-log) datasets
    pub fn write_leaf_tract_float(&self, id: usize, tract: &CompactTract) -> TractCloudResult<()> {
        let path = self.tract_path("leaf", id, self.zipped);
        self.write_float(&path, tract)
    }

    fn write_float(&self, path: &Path, tract: &CompactTract) -> TractCloudResult<()> {
        let mut header = Vec::with_capacity(15);
        header.extend_from_slice(TRACT_MAGIC);
        header.push(1);
        header.push(DTYPE_F32);
        let mut flags = 0;
        if tract.is_log() {
            flags |= FLAG_LOG;
        }
        if tract.is_thresholded() {
            flags |= FLAG_THRESHOLDED;
        }
        header.push(flags);
        header.extend_from_slice(&(tract.len() as u64).to_le_bytes());
        let mut payload = Vec::with_capacity(tract.len() * 4);
        for v in tract.values() {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        self.write_payload(path, &header, &payload)
    }

    /// Removes every node tract file left in the folder, the shutdown sweep of a
    /// temporary merge folder.
    pub fn sweep_node_tracts(&self) -> TractCloudResult<usize> {
        let pattern = self.folder.join("node_*.ctv*");
        let mut removed = 0;
        for entry in glob::glob(&pattern.to_string_lossy())
            .map_err(|e| TractCloudError::BadArgument(format!("bad sweep pattern: {}", e)))?
        {
            match entry {
                Ok(path) => {
                    if std::fs::remove_file(&path).is_ok() {
                        removed += 1;
                    }
                }
                Err(e) => log::warn!("skipping unreadable tract file: {}", e),
            }
        }
        Ok(removed)
    }
}

impl TractStore for FsTractStore {
    fn read_leaf_tract(&self, id: usize) -> TractCloudResult<CompactTractChar> {
        let (dtype, flags, payload) = self.read_raw("leaf", id)?;
        let mut tract = match dtype {
            DTYPE_U8 => CompactTractChar::new(payload),
            _ => {
                let values: Vec<f32> = payload
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                CompactTractChar::from_float(&CompactTract::new(values))
            }
        };
        if flags & FLAG_THRESHOLDED != 0 {
            tract.restore_flags(true);
        }
        Ok(tract)
    }

    fn read_leaf_tract_float(&self, id: usize) -> TractCloudResult<CompactTract> {
        self.read_float("leaf", id)
    }

    fn read_node_tract(&self, id: usize) -> TractCloudResult<CompactTract> {
        self.read_float("node", id)
    }

    fn write_node_tract(&self, id: usize, tract: &CompactTract) -> TractCloudResult<()> {
        let path = self.tract_path("node", id, self.zipped);
        self.write_float(&path, tract)
    }

    fn delete_node_tract(&self, id: usize) -> TractCloudResult<()> {
        for zipped in [false, true] {
            let path = self.tract_path("node", id, zipped);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------------
// in-RAM store

/// Keeps every tract in memory. The leaf vector is fixed at construction, node
/// tracts accumulate behind a lock as merges produce them.
#[derive(Debug, Default)]
pub struct RamTractStore {
    leaves: Vec<CompactTract>,
    nodes: RwLock<HashMap<usize, CompactTract>>,
}

impl RamTractStore {
    /// A store over a fixed set of leaf tracts
    pub fn new(leaves: Vec<CompactTract>) -> RamTractStore {
        RamTractStore {
            leaves,
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Number of leaf tracts held
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    ///
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

impl TractStore for RamTractStore {
    fn read_leaf_tract(&self, id: usize) -> TractCloudResult<CompactTractChar> {
        self.leaves
            .get(id)
            .map(CompactTractChar::from_float)
            .ok_or(TractCloudError::DataAccessError {
                index: id,
                reason: "leaf id beyond store".to_string(),
            })
    }

    fn read_leaf_tract_float(&self, id: usize) -> TractCloudResult<CompactTract> {
        self.leaves
            .get(id)
            .cloned()
            .ok_or(TractCloudError::DataAccessError {
                index: id,
                reason: "leaf id beyond store".to_string(),
            })
    }

    fn read_node_tract(&self, id: usize) -> TractCloudResult<CompactTract> {
        self.nodes
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(TractCloudError::DataAccessError {
                index: id,
                reason: "node tract was never written".to_string(),
            })
    }

    fn write_node_tract(&self, id: usize, tract: &CompactTract) -> TractCloudResult<()> {
        self.nodes.write().unwrap().insert(id, tract.clone());
        Ok(())
    }

    fn delete_node_tract(&self, id: usize) -> TractCloudResult<()> {
        self.nodes.write().unwrap().remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn log_tract(values: Vec<f32>) -> CompactTract {
        CompactTract::from_log_units(values)
    }

    #[test]
    fn fs_node_tract_roundtrip() {
        let dir = TempDir::new("store").unwrap();
        let store = FsTractStore::new(dir.path());
        let tract = CompactTract::new(vec![0.125, 0.25, 0.5, 1.0]);
        store.write_node_tract(3, &tract).unwrap();
        let back = store.read_node_tract(3).unwrap();
        assert_eq!(back.values(), tract.values());
        assert!(!back.is_log());
        assert!(!back.is_thresholded());
    }

    #[test]
    fn fs_zipped_roundtrip() {
        let dir = TempDir::new("store").unwrap();
        let mut store = FsTractStore::new(dir.path());
        store.store_zipped(true);
        let mut tract = log_tract(vec![0.1, 0.9, 0.0]);
        tract.threshold(0.05);
        store.write_node_tract(11, &tract).unwrap();
        let back = store.read_node_tract(11).unwrap();
        assert_eq!(back.values(), tract.values());
        assert!(back.is_log());
        assert!(back.is_thresholded());
    }

    #[test]
    fn fs_leaf_byte_roundtrip() {
        let dir = TempDir::new("store").unwrap();
        let store = FsTractStore::new(dir.path());
        let tract = CompactTractChar::new(vec![0, 127, 255]);
        store.write_leaf_tract(0, &tract).unwrap();
        let back = store.read_leaf_tract(0).unwrap();
        assert_eq!(back.values(), tract.values());
        let back_f = store.read_leaf_tract_float(0).unwrap();
        assert!(back_f.is_log());
        assert!((back_f.values()[1] - 127.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn fs_delete_and_sweep() {
        let dir = TempDir::new("store").unwrap();
        let store = FsTractStore::new(dir.path());
        let tract = CompactTract::new(vec![1.0]);
        store.write_node_tract(0, &tract).unwrap();
        store.write_node_tract(1, &tract).unwrap();
        store.delete_node_tract(0).unwrap();
        assert!(store.read_node_tract(0).is_err());
        assert_eq!(store.sweep_node_tracts().unwrap(), 1);
        assert!(store.read_node_tract(1).is_err());
        // deleting what is already gone stays quiet
        store.delete_node_tract(0).unwrap();
    }

    #[test]
    fn ram_store_behaves_like_fs() {
        let store = RamTractStore::new(vec![log_tract(vec![1.0, 0.0])]);
        let leaf = store.read_leaf_tract(0).unwrap();
        assert_eq!(leaf.values(), &[255, 0]);
        assert!(store.read_leaf_tract(1).is_err());
        store
            .write_node_tract(0, &CompactTract::new(vec![0.5, 0.5]))
            .unwrap();
        assert_eq!(store.read_node_tract(0).unwrap().values(), &[0.5, 0.5]);
        store.delete_node_tract(0).unwrap();
        assert!(store.read_node_tract(0).is_err());
    }
}
