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

//! The errors that can occur when a cluster tree is building, working or saving.
//! Most io errors are floated up from `TractCloud` as that's the i/o layer.

use std::error::Error;
use std::fmt;
use std::io;
use tractcloud::errors::TractCloudError;

/// Helper type for a call that could go wrong.
pub type HitreeResult<T> = Result<T, HitreeError>;

/// Error type for the cluster engine. `BadArgument` and `Precondition` surface at
/// the API boundary without side effects; `Corruption` and the io kinds abort the
/// enclosing operation after a best-effort debug dump.
#[derive(Debug)]
pub enum HitreeError {
    /// Floated up from the tract access layer
    TractCloud(TractCloudError),
    /// IO error on tree or correspondence files
    IoError(io::Error),
    /// An unsupported or out-of-range parameter: neighborhood order, growth mode,
    /// coarsening ratio, prune ratio
    BadArgument(String),
    /// An operation was invoked on data in the wrong state: wrong tract
    /// representation, empty tree, mismatched base-node vectors
    Precondition(&'static str),
    /// The tree or the builder frontier violated a structural invariant
    Corruption(String),
    /// A leaf or node id that resolves nowhere
    IdNotInTree(usize),
}

impl fmt::Display for HitreeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            HitreeError::TractCloud(ref e) => write!(f, "{}", e),
            HitreeError::IoError(ref e) => write!(f, "{}", e),
            HitreeError::BadArgument(ref msg) => write!(f, "bad argument: {}", msg),
            HitreeError::Precondition(msg) => write!(f, "precondition violated: {}", msg),
            HitreeError::Corruption(ref msg) => write!(f, "tree corruption: {}", msg),
            HitreeError::IdNotInTree(id) => {
                write!(f, "id {} does not resolve within the tree", id)
            }
        }
    }
}

#[allow(deprecated)]
impl Error for HitreeError {
    fn cause(&self) -> Option<&dyn Error> {
        match *self {
            HitreeError::TractCloud(ref e) => Some(e),
            HitreeError::IoError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<TractCloudError> for HitreeError {
    fn from(err: TractCloudError) -> Self {
        HitreeError::TractCloud(err)
    }
}

impl From<io::Error> for HitreeError {
    fn from(err: io::Error) -> Self {
        HitreeError::IoError(err)
    }
}
