pub mod bvh;
pub mod executor;
pub mod geometry;
pub mod ray_list;
pub mod scene;
mod util;

pub use bvh::{
    BuildConfig, BuildStatistics, Bvh, BvhError, Quality, TraversalMode, TraversalStack,
};
pub use scene::{HitRecord, Scene};
pub use util::Stats;
