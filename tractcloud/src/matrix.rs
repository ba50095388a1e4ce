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

//! The cross-tree distance matrix container: a single image-like file holding an
//! N1 x N2 float32 matrix in row-major little-endian order, optionally gzipped.
//! Row and column order match the base-node vectors as of the moment of writing.

use crate::errors::{TractCloudError, TractCloudResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array2;
use std::convert::TryInto;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

const MATRIX_MAGIC: &[u8; 4] = b"CDMX";

/// Writes a distance matrix container
pub fn write_dist_matrix<P: AsRef<Path>>(
    path: P,
    matrix: &Array2<f32>,
    zipped: bool,
) -> TractCloudResult<()> {
    let mut header = Vec::with_capacity(21);
    header.extend_from_slice(MATRIX_MAGIC);
    header.push(1);
    header.extend_from_slice(&(matrix.nrows() as u64).to_le_bytes());
    header.extend_from_slice(&(matrix.ncols() as u64).to_le_bytes());
    let mut payload = Vec::with_capacity(matrix.len() * 4);
    for v in matrix.iter() {
        payload.extend_from_slice(&v.to_le_bytes());
    }
    if zipped {
        let file = File::create(path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&header)?;
        encoder.write_all(&payload)?;
        encoder.finish()?;
    } else {
        let mut file = File::create(path)?;
        file.write_all(&header)?;
        file.write_all(&payload)?;
    }
    Ok(())
}

/// Reads a distance matrix container back
pub fn read_dist_matrix<P: AsRef<Path>>(path: P) -> TractCloudResult<Array2<f32>> {
    let mut raw = Vec::new();
    File::open(path)?.read_to_end(&mut raw)?;
    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut decoded = Vec::new();
        GzDecoder::new(&raw[..]).read_to_end(&mut decoded)?;
        raw = decoded;
    }
    let bad = |reason: &str| TractCloudError::ParsingError {
        line: 0,
        reason: reason.to_string(),
    };
    if raw.len() < 21 || &raw[0..4] != MATRIX_MAGIC {
        return Err(bad("not a distance matrix container"));
    }
    if raw[4] != 1 {
        return Err(bad("unknown matrix container version"));
    }
    let rows = u64::from_le_bytes(raw[5..13].try_into().unwrap()) as usize;
    let cols = u64::from_le_bytes(raw[13..21].try_into().unwrap()) as usize;
    if raw.len() != 21 + rows * cols * 4 {
        return Err(bad("truncated matrix container"));
    }
    let values: Vec<f32> = raw[21..]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| bad(&format!("matrix shape mismatch: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn roundtrip_plain_and_zipped() {
        let dir = TempDir::new("matrix").unwrap();
        let matrix =
            Array2::from_shape_vec((2, 3), vec![0.2, 0.9, 0.95, 0.8, 0.1, 0.7]).unwrap();
        for zipped in [false, true] {
            let path = dir.path().join(if zipped { "m.gz" } else { "m" });
            write_dist_matrix(&path, &matrix, zipped).unwrap();
            let back = read_dist_matrix(&path).unwrap();
            assert_eq!(back, matrix);
        }
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = TempDir::new("matrix").unwrap();
        let path = dir.path().join("junk");
        std::fs::write(&path, b"not a matrix").unwrap();
        assert!(read_dist_matrix(&path).is_err());
    }
}
