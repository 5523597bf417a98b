//! Data module for feature batches and entity graphs
//!
//! This module provides:
//! - `GraphBlock`: edge lists over spots/cells, kNN construction, neighbor sampling
//! - `FeatureBatch`: gene features with the optional graph and image patches

mod batch;
mod graph;

pub use batch::FeatureBatch;
pub use graph::GraphBlock;
