pub mod centroids;
pub mod error;
pub mod input;
pub mod matching;
pub mod output;
pub mod reconcile;
pub mod repair;
pub mod schemas;
pub mod segment;
pub mod stack;

pub use error::{Error, Result};

/// Label value reserved for background voxels in every label map.
pub const BACKGROUND: u32 = 0;
