//! # Memory-augmented GAN generators for spatial transcriptomics
//!
//! Generator side of a GAN/GNN anomaly detector for spatial and single-cell
//! gene expression. Entities (spots or cells) are encoded, optionally fused
//! with their image patches, snapped onto a learned memory of normal
//! prototypes and decoded again; poor reconstructions flag anomalies.
//!
//! ## Modules
//!
//! - `data`: feature batches and entity graphs
//! - `model`: generators, extractors, memory/style blocks and `KinPair`
//! - `training`: interpolation, gradient penalty and losses
//! - `utils`: configuration, seeding/device selection and weight files

pub mod data;
pub mod error;
pub mod model;
pub mod training;
pub mod utils;

pub use data::{FeatureBatch, GraphBlock};
pub use error::{Result, StandsError};
pub use model::{ForwardMode, GeneratorAD, GeneratorBC, KinPair, KinPairOutput, Modality, Reconstruction};
pub use training::{gradient_penalty, interpolate, Critic, PenaltyInput, ScoreMode};
pub use utils::{seed_everything, select_device, Config, GpuRequest, RuntimeContext, WeightMergeReport};
