//! Utility module: configuration, runtime setup and weight files

mod config;
mod runtime;
mod weights;

pub use config::{Config, MemoryConfig, ModelConfig, PenaltyConfig, RuntimeConfig};
pub use runtime::{parse_device, seed_everything, select_device, GpuRequest, RuntimeContext};
pub use weights::{
    load_weights_into, merge_weights, read_weight_file, write_weight_file, WeightMergeReport,
};
