//! Statistical kernels for tree comparison: plain and size-weighted Pearson
//! accumulators and the combinatorial helpers the triplet statistics rely on.
//! Everything here is a mergeable value type so the callers can fold partial
//! sums out of parallel sweeps.

pub mod combinatorics;
pub mod correlation;

pub use combinatorics::{binomial, strided_len};
pub use correlation::{PearsonAccumulator, WeightedPearsonAccumulator};
