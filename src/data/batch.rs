//! Feature batches handed to the generators

use tch::{Device, Tensor};

use super::graph::GraphBlock;
use crate::error::{Result, StandsError};

/// Per-entity gene features plus the optional graph and image patches
///
/// `feat_g` is `[N, gene_dim]`; `feat_p`, when present, is `[N, C, P, P]`.
#[derive(Debug)]
pub struct FeatureBatch {
    pub graph: Option<GraphBlock>,
    pub feat_g: Tensor,
    pub feat_p: Option<Tensor>,
}

impl FeatureBatch {
    /// Spatial batch: graph + gene features
    pub fn spatial(graph: GraphBlock, feat_g: Tensor) -> Self {
        Self {
            graph: Some(graph),
            feat_g,
            feat_p: None,
        }
    }

    /// Single-cell batch: gene features only
    pub fn single_cell(feat_g: Tensor) -> Self {
        Self {
            graph: None,
            feat_g,
            feat_p: None,
        }
    }

    /// Dual-modality batch: graph + gene features + registered image patches
    pub fn full(graph: GraphBlock, feat_g: Tensor, feat_p: Tensor) -> Self {
        Self {
            graph: Some(graph),
            feat_g,
            feat_p: Some(feat_p),
        }
    }

    /// Number of entities (rows of `feat_g`)
    pub fn num_entities(&self) -> i64 {
        self.feat_g.size().first().copied().unwrap_or(0)
    }

    /// Check that graph, gene features and patches agree on the entity count
    pub fn validate(&self) -> Result<()> {
        let features = self.feat_g.size();
        if features.len() != 2 {
            return Err(StandsError::shape("gene features", &[-1, -1], &features));
        }

        let n = features[0];
        if n == 0 {
            return Err(StandsError::EmptyBatch("feature batch"));
        }
        let graph = self.graph.as_ref().map(GraphBlock::num_nodes);
        let patches = match &self.feat_p {
            Some(p) => {
                let size = p.size();
                match size.first() {
                    Some(&rows) => Some(rows),
                    None => return Err(StandsError::shape("image patches", &[n, -1, -1, -1], &size)),
                }
            }
            None => None,
        };

        if graph.map_or(false, |g| g != n) || patches.map_or(false, |p| p != n) {
            return Err(StandsError::EntityCountMismatch {
                graph,
                features: n,
                patches,
            });
        }
        Ok(())
    }

    /// Stage the batch onto `device`
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            graph: self.graph.as_ref().map(|g| g.to_device(device)),
            feat_g: self.feat_g.to_device(device),
            feat_p: self.feat_p.as_ref().map(|p| p.to_device(device)),
        }
    }

    pub(crate) fn require_graph(&self) -> Result<&GraphBlock> {
        self.graph
            .as_ref()
            .ok_or(StandsError::MissingInput("graph block"))
    }

    pub(crate) fn require_patches(&self) -> Result<&Tensor> {
        self.feat_p
            .as_ref()
            .ok_or(StandsError::MissingInput("image patches"))
    }
}
