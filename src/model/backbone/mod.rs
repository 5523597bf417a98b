//! Extractors and the latent-space blocks they feed
//!
//! This module provides:
//! - `Extractor`, `ExtractorOnlyST`, `ExtractorOnlySC`: per-modality encoders/decoders
//! - `Backbone`: the variant chosen for a modality
//! - `MemoryBlock`: prototype memory over latents
//! - `StyleBlock`: per-batch latent offsets
//! - `GeneCoder`: the gene encode/decode path shared by every variant

mod extractor;
mod layers;
mod memory;
mod style;

pub use extractor::{Extractor, ExtractorOnlySC, ExtractorOnlyST, GraphEncoder};
pub use layers::{DenseBlock, GraphConvLayer};
pub use memory::MemoryBlock;
pub use style::StyleBlock;

use tch::{nn, Tensor};

use super::Modality;
use crate::data::GraphBlock;
use crate::error::{Result, StandsError};
use crate::utils::ModelConfig;

/// Gene-expression encode/decode path of an extractor
pub trait GeneCoder {
    /// Width of the gene latent
    fn z_dim(&self) -> i64;

    /// Encode `[N, gene_dim]` features; graph variants require `graph`
    fn gene_encode(&self, graph: Option<&GraphBlock>, feat: &Tensor) -> Result<Tensor>;

    /// Decode `[N, z_dim]` latents back to `[N, gene_dim]`
    fn gene_decode(&self, z: &Tensor) -> Tensor;
}

impl<T: GeneCoder + ?Sized> GeneCoder for &T {
    fn z_dim(&self) -> i64 {
        (**self).z_dim()
    }

    fn gene_encode(&self, graph: Option<&GraphBlock>, feat: &Tensor) -> Result<Tensor> {
        (**self).gene_encode(graph, feat)
    }

    fn gene_decode(&self, z: &Tensor) -> Tensor {
        (**self).gene_decode(z)
    }
}

impl GeneCoder for ExtractorOnlyST {
    fn z_dim(&self) -> i64 {
        ExtractorOnlyST::z_dim(self)
    }

    fn gene_encode(&self, graph: Option<&GraphBlock>, feat: &Tensor) -> Result<Tensor> {
        let graph = graph.ok_or(StandsError::MissingInput("graph block"))?;
        self.encode(graph, feat)
    }

    fn gene_decode(&self, z: &Tensor) -> Tensor {
        self.decode(z)
    }
}

impl GeneCoder for ExtractorOnlySC {
    fn z_dim(&self) -> i64 {
        ExtractorOnlySC::z_dim(self)
    }

    /// The graph, if any, is ignored
    fn gene_encode(&self, _graph: Option<&GraphBlock>, feat: &Tensor) -> Result<Tensor> {
        self.encode(feat)
    }

    fn gene_decode(&self, z: &Tensor) -> Tensor {
        self.decode(z)
    }
}

impl GeneCoder for Extractor {
    fn z_dim(&self) -> i64 {
        self.half_dim()
    }

    fn gene_encode(&self, graph: Option<&GraphBlock>, feat: &Tensor) -> Result<Tensor> {
        let graph = graph.ok_or(StandsError::MissingInput("graph block"))?;
        self.encode_genes(graph, feat)
    }

    fn gene_decode(&self, z: &Tensor) -> Tensor {
        self.decode_genes(z)
    }
}

/// Extractor variant selected by the modality flags
#[derive(Debug)]
pub enum Backbone {
    Full(Extractor),
    Spatial(ExtractorOnlyST),
    SingleCell(ExtractorOnlySC),
}

impl Backbone {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Result<Self> {
        let backbone = match config.modality()? {
            Modality::Full => Backbone::Full(Extractor::new(vs, config)?),
            Modality::SpatialOnly => Backbone::Spatial(ExtractorOnlyST::new(vs, config)),
            Modality::SingleCellOnly => Backbone::SingleCell(ExtractorOnlySC::new(vs, config)),
        };
        Ok(backbone)
    }

    pub fn modality(&self) -> Modality {
        match self {
            Backbone::Full(_) => Modality::Full,
            Backbone::Spatial(_) => Modality::SpatialOnly,
            Backbone::SingleCell(_) => Modality::SingleCellOnly,
        }
    }

    /// Width of the complete latent (both halves in full mode)
    pub fn latent_dim(&self) -> i64 {
        match self {
            Backbone::Full(e) => e.z_dim(),
            Backbone::Spatial(e) => e.z_dim(),
            Backbone::SingleCell(e) => e.z_dim(),
        }
    }

    fn coder(&self) -> &dyn GeneCoder {
        match self {
            Backbone::Full(e) => e,
            Backbone::Spatial(e) => e,
            Backbone::SingleCell(e) => e,
        }
    }
}

impl GeneCoder for Backbone {
    fn z_dim(&self) -> i64 {
        self.coder().z_dim()
    }

    fn gene_encode(&self, graph: Option<&GraphBlock>, feat: &Tensor) -> Result<Tensor> {
        self.coder().gene_encode(graph, feat)
    }

    fn gene_decode(&self, z: &Tensor) -> Tensor {
        self.coder().gene_decode(z)
    }
}
