//! Time-series utilities: chunk merging, conflict resolution, checksums.

pub mod merge;
pub mod util;
