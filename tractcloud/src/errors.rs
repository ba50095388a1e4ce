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

//! The errors that can occur when a tract cloud is loading, working or saving
use std::error::Error;
use std::fmt;
use std::io;

///
pub type TractCloudResult<T> = Result<T, TractCloudError>;

/// Error type for the tract cloud
#[derive(Debug)]
pub enum TractCloudError {
    /// Unable to retrieve some tract (given by index) from a store
    DataAccessError {
        /// Index of access error
        index: usize,
        /// What went wrong with the access
        reason: String,
    },
    /// A tract was used in the wrong representation (wrong units, stale norm, length mismatch)
    PreconditionViolated(&'static str),
    /// An out-of-range or unsupported parameter was passed in
    BadArgument(String),
    /// IO error when opening files
    IoError(io::Error),
    /// Parsing error when loading a tagged text file
    ParsingError {
        /// Line the parse failed on
        line: usize,
        /// What was expected there
        reason: String,
    },
}

impl fmt::Display for TractCloudError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TractCloudError::IoError(ref e) => write!(f, "{}", e),
            TractCloudError::DataAccessError { index, ref reason } => {
                write!(f, "unable to access tract {}: {}", index, reason)
            }
            TractCloudError::PreconditionViolated(msg) => write!(f, "{}", msg),
            TractCloudError::BadArgument(ref msg) => write!(f, "{}", msg),
            TractCloudError::ParsingError { line, ref reason } => {
                write!(f, "parse failure on line {}: {}", line, reason)
            }
        }
    }
}

#[allow(deprecated)]
impl Error for TractCloudError {
    fn cause(&self) -> Option<&dyn Error> {
        match *self {
            TractCloudError::IoError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TractCloudError {
    fn from(err: io::Error) -> Self {
        TractCloudError::IoError(err)
    }
}

impl From<TractCloudError> for io::Error {
    fn from(err: TractCloudError) -> Self {
        match err {
            TractCloudError::IoError(e) => e,
            e => io::Error::new(io::ErrorKind::Other, Box::new(e)),
        }
    }
}
