//! Model module containing the reconstruction generators
//!
//! This module provides:
//! - `GeneratorAD`: extractor + memory reconstruction for anomaly detection
//! - `GeneratorBC`: extractor + per-batch style for batch correction
//! - `KinPair`: non-negative linear mapping between latent sets
//! - `backbone`: extractor variants, memory and style blocks

pub mod backbone;
mod generator;
mod kinpair;
mod mode;

pub use generator::{GeneratorAD, GeneratorBC, Reconstruction};
pub use kinpair::{KinPair, KinPairOutput};
pub use mode::{ForwardMode, Modality};
