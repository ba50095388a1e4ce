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

//! # Tree files
//! The tree is persisted as a tagged text document: header tags, one line per leaf
//! and node, then the coordinate and discarded blocks. Ids are contiguous, refs are
//! written `l<i>` / `n<i>` / `none`. Unknown `#` lines are tolerated on read, kept,
//! and re-emitted on write, so hand annotations survive a round-trip.

use crate::errors::{HitreeError, HitreeResult};
use crate::tree::node::{Leaf, Node};
use crate::tree::tree::HcTree;
use crate::ClusterId;
use smallvec::SmallVec;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tractcloud::{GridDims, SeedCoord};

const KNOWN_TAGS: [&str; 10] = [
    "#name",
    "#grid",
    "#size",
    "#streams",
    "#logfactor",
    "#cpcc",
    "#leaves",
    "#nodes",
    "#coordinates",
    "#discarded",
];

fn write_ref<W: Write>(writer: &mut W, id: ClusterId) -> std::io::Result<()> {
    if id.is_none() {
        write!(writer, "none")
    } else if id.is_node() {
        write!(writer, "n{}", id.index())
    } else {
        write!(writer, "l{}", id.index())
    }
}

fn parse_ref(token: &str, line: usize) -> HitreeResult<ClusterId> {
    let bad = || {
        HitreeError::Corruption(format!(
            "line {}: \"{}\" is not a leaf/node ref",
            line, token
        ))
    };
    if token == "none" {
        return Ok(ClusterId::NONE);
    }
    let (kind, index) = token.split_at(1);
    let index: usize = index.parse().map_err(|_| bad())?;
    match kind {
        "l" => Ok(ClusterId::leaf(index)),
        "n" => Ok(ClusterId::node(index)),
        _ => Err(bad()),
    }
}

fn parse_coord(tokens: &[&str], line: usize) -> HitreeResult<SeedCoord> {
    let bad = || HitreeError::Corruption(format!("line {}: expected x y z", line));
    if tokens.len() != 3 {
        return Err(bad());
    }
    let mut values = [0i32; 3];
    for (slot, token) in values.iter_mut().zip(tokens) {
        *slot = token.parse().map_err(|_| bad())?;
    }
    Ok(SeedCoord::new(values[0], values[1], values[2]))
}

impl HcTree {
    /// Writes the tree file
    pub fn write_tree<P: AsRef<Path>>(&self, path: P) -> HitreeResult<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "#name")?;
        writeln!(writer, "{}", self.tree_name)?;
        writeln!(writer, "#grid")?;
        writeln!(writer, "{}", self.grid)?;
        writeln!(writer, "#size")?;
        writeln!(writer, "{}", self.dims)?;
        writeln!(writer, "#streams")?;
        writeln!(writer, "{}", self.num_streamlines)?;
        writeln!(writer, "#logfactor")?;
        writeln!(writer, "{}", self.log_factor)?;
        if let Some(cpcc) = self.cpcc {
            writeln!(writer, "#cpcc")?;
            writeln!(writer, "{}", cpcc)?;
        }
        for comment in &self.comments {
            writeln!(writer, "{}", comment)?;
        }
        writeln!(writer, "#leaves")?;
        for leaf in self.leaves() {
            write!(writer, "{} ", leaf.id().index())?;
            write_ref(&mut writer, leaf.parent())?;
            writeln!(writer)?;
        }
        writeln!(writer, "#nodes")?;
        for node in self.nodes() {
            write!(writer, "{} ", node.id().index())?;
            write_ref(&mut writer, node.parent())?;
            write!(
                writer,
                " {} {} {}",
                node.level(),
                node.size(),
                node.hlevel()
            )?;
            for kid in node.children() {
                write!(writer, " ")?;
                write_ref(&mut writer, *kid)?;
            }
            writeln!(writer)?;
        }
        writeln!(writer, "#coordinates")?;
        for coord in self.coordinates() {
            writeln!(writer, "{}", coord)?;
        }
        writeln!(writer, "#discarded")?;
        for coord in &self.discarded {
            writeln!(writer, "{}", coord)?;
        }
        writeln!(writer, "#end")?;
        Ok(())
    }

    /// Reads a tree file back. The result is validated with `check()`.
    pub fn read_tree<P: AsRef<Path>>(path: P) -> HitreeResult<HcTree> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut tree = HcTree::default();
        let mut section = String::new();
        for (line_index, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            let line_num = line_index + 1;
            if trimmed.is_empty() || trimmed == "#end" {
                continue;
            }
            if trimmed.starts_with('#') {
                if KNOWN_TAGS.contains(&trimmed) {
                    section = trimmed.to_string();
                } else {
                    tree.comments.push(trimmed.to_string());
                }
                continue;
            }
            let bad = |reason: String| HitreeError::Corruption(format!("line {}: {}", line_num, reason));
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            match section.as_str() {
                "#name" => tree.tree_name = trimmed.to_string(),
                "#grid" => tree.grid = trimmed.to_string(),
                "#size" => {
                    if tokens.len() != 3 {
                        return Err(bad("expected three grid dimensions".to_string()));
                    }
                    tree.dims = GridDims {
                        x: tokens[0].parse().map_err(|_| bad("bad dimension".to_string()))?,
                        y: tokens[1].parse().map_err(|_| bad("bad dimension".to_string()))?,
                        z: tokens[2].parse().map_err(|_| bad("bad dimension".to_string()))?,
                    };
                }
                "#streams" => {
                    tree.num_streamlines = trimmed
                        .parse()
                        .map_err(|_| bad("bad streamline count".to_string()))?;
                }
                "#logfactor" => {
                    tree.log_factor = trimmed
                        .parse()
                        .map_err(|_| bad("bad log factor".to_string()))?;
                }
                "#cpcc" => {
                    tree.cpcc =
                        Some(trimmed.parse().map_err(|_| bad("bad cpcc".to_string()))?);
                }
                "#leaves" => {
                    if tokens.len() != 2 {
                        return Err(bad("expected: id parent".to_string()));
                    }
                    let index: usize = tokens[0]
                        .parse()
                        .map_err(|_| bad("bad leaf id".to_string()))?;
                    if index != tree.leaves.len() {
                        return Err(bad(format!(
                            "leaf ids must be contiguous, expected {}",
                            tree.leaves.len()
                        )));
                    }
                    let mut leaf = Leaf::new(index);
                    leaf.parent = parse_ref(tokens[1], line_num)?;
                    tree.leaves.push(leaf);
                }
                "#nodes" => {
                    if tokens.len() < 6 {
                        return Err(bad(
                            "expected: id parent level size hlevel kids...".to_string(),
                        ));
                    }
                    let index: usize = tokens[0]
                        .parse()
                        .map_err(|_| bad("bad node id".to_string()))?;
                    if index != tree.nodes.len() {
                        return Err(bad(format!(
                            "node ids must be contiguous, expected {}",
                            tree.nodes.len()
                        )));
                    }
                    let parent = parse_ref(tokens[1], line_num)?;
                    let level: f32 = tokens[2]
                        .parse()
                        .map_err(|_| bad("bad distance level".to_string()))?;
                    let size: usize = tokens[3]
                        .parse()
                        .map_err(|_| bad("bad size".to_string()))?;
                    let hlevel: usize = tokens[4]
                        .parse()
                        .map_err(|_| bad("bad hlevel".to_string()))?;
                    let mut children = SmallVec::new();
                    for token in &tokens[5..] {
                        children.push(parse_ref(token, line_num)?);
                    }
                    let mut node = Node::new(index, children, size, level, hlevel);
                    node.parent = parent;
                    tree.nodes.push(node);
                }
                "#coordinates" => tree.coordinates.push(parse_coord(&tokens, line_num)?),
                "#discarded" => tree.discarded.push(parse_coord(&tokens, line_num)?),
                _ => {
                    return Err(bad("content outside of any tagged block".to_string()));
                }
            }
        }
        tree.track_ids = (0..tree.leaves.len()).collect();
        tree.check()?;
        Ok(tree)
    }

    /// Writes a debug dump without validating anything, the best-effort artifact a
    /// fatal error leaves behind
    pub fn write_tree_debug<P: AsRef<Path>>(&self, path: P) {
        if let Err(e) = self.write_tree(path) {
            log::warn!("could not write debug tree: {}", e);
        }
    }
}

/// Writes a base list file: the `#bases` node ids and the `#pruned` leaf ids
pub fn write_base_list<P: AsRef<Path>>(
    path: P,
    bases: &[usize],
    pruned: &[usize],
) -> HitreeResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "#bases")?;
    for base in bases {
        writeln!(writer, "{}", base)?;
    }
    writeln!(writer, "#pruned")?;
    for leaf in pruned {
        writeln!(writer, "{}", leaf)?;
    }
    writeln!(writer, "#end")?;
    Ok(())
}

/// Reads a base list file back as (bases, pruned)
pub fn read_base_list<P: AsRef<Path>>(path: P) -> HitreeResult<(Vec<usize>, Vec<usize>)> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut bases = Vec::new();
    let mut pruned = Vec::new();
    let mut section = String::new();
    for (line_index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == "#end" {
            continue;
        }
        if trimmed.starts_with('#') {
            section = trimmed.to_string();
            continue;
        }
        let value: usize = trimmed.parse().map_err(|_| {
            HitreeError::Corruption(format!("line {}: bad id in base list", line_index + 1))
        })?;
        match section.as_str() {
            "#bases" => bases.push(value),
            "#pruned" => pruned.push(value),
            _ => {
                return Err(HitreeError::Corruption(format!(
                    "line {}: id outside of any block",
                    line_index + 1
                )))
            }
        }
    }
    Ok((bases, pruned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tree::tests::two_base_tree;
    use tempdir::TempDir;

    #[test]
    fn tree_file_roundtrip() {
        let dir = TempDir::new("treeio").unwrap();
        let path = dir.path().join("tree.txt");
        let mut tree = two_base_tree();
        tree.cpcc = Some(0.875);
        tree.discarded.push(SeedCoord::new(9, 9, 9));
        tree.write_tree(&path).unwrap();
        let back = HcTree::read_tree(&path).unwrap();
        assert_eq!(back.tree_name, tree.tree_name);
        assert_eq!(back.grid, tree.grid);
        assert_eq!(back.dims, tree.dims);
        assert_eq!(back.cpcc, Some(0.875));
        assert_eq!(back.num_leaves(), tree.num_leaves());
        assert_eq!(back.num_nodes(), tree.num_nodes());
        assert_eq!(back.coordinates(), tree.coordinates());
        assert_eq!(back.discarded, tree.discarded);
        for (a, b) in back.nodes().iter().zip(tree.nodes()) {
            assert_eq!(a.level(), b.level());
            assert_eq!(a.size(), b.size());
            assert_eq!(a.children(), b.children());
        }
    }

    #[test]
    fn comments_survive_roundtrip() {
        let dir = TempDir::new("treeio").unwrap();
        let path = dir.path().join("tree.txt");
        let mut tree = two_base_tree();
        tree.comments.push("# built overnight, check odd seeds".to_string());
        tree.write_tree(&path).unwrap();
        let back = HcTree::read_tree(&path).unwrap();
        assert_eq!(back.comments, tree.comments);
        let rewritten = dir.path().join("tree2.txt");
        back.write_tree(&rewritten).unwrap();
        let again = HcTree::read_tree(&rewritten).unwrap();
        assert_eq!(again.comments, tree.comments);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = TempDir::new("treeio").unwrap();
        let path = dir.path().join("broken.txt");
        std::fs::write(&path, "#leaves\n0 n0\n#nodes\n0 none 0.5 7 1 l0\n").unwrap();
        assert!(HcTree::read_tree(&path).is_err());
    }

    #[test]
    fn base_list_roundtrip() {
        let dir = TempDir::new("treeio").unwrap();
        let path = dir.path().join("bases.txt");
        write_base_list(&path, &[3, 5, 8], &[0, 1]).unwrap();
        let (bases, pruned) = read_base_list(&path).unwrap();
        assert_eq!(bases, vec![3, 5, 8]);
        assert_eq!(pruned, vec![0, 1]);
    }
}
