//! Per-batch style offsets for batch-effect correction

use tch::{nn, Kind, Tensor};

use crate::error::{Result, StandsError};

/// One learned latent offset per batch id
#[derive(Debug)]
pub struct StyleBlock {
    style: Tensor,
    n_batch: i64,
    z_dim: i64,
}

impl StyleBlock {
    pub fn new(vs: &nn::Path, n_batch: i64, z_dim: i64) -> Result<Self> {
        if n_batch <= 0 || z_dim <= 0 {
            return Err(StandsError::InvalidConfig(format!(
                "style block needs n_batch > 0 and z_dim > 0, got {} and {}",
                n_batch, z_dim
            )));
        }

        let bound = 1.0 / (z_dim as f64).sqrt();
        let style = vs.var(
            "style",
            &[n_batch, z_dim],
            nn::Init::Uniform {
                lo: -bound,
                up: bound,
            },
        );
        Ok(Self {
            style,
            n_batch,
            z_dim,
        })
    }

    /// Subtract each entity's batch offset: `z[i] - style[batch_ids[i]]`
    pub fn forward(&self, z: &Tensor, batch_ids: &Tensor) -> Result<Tensor> {
        let size = z.size();
        if size.len() != 2 || size[1] != self.z_dim {
            return Err(StandsError::shape("style input", &[-1, self.z_dim], &size));
        }
        let ids = batch_ids.to_kind(Kind::Int64).to_device(z.device()).flatten(0, -1);
        if ids.size()[0] != size[0] {
            return Err(StandsError::shape("batch ids", &[size[0]], &batch_ids.size()));
        }

        if ids.numel() > 0 {
            let lo = ids.min().int64_value(&[]);
            let hi = ids.max().int64_value(&[]);
            if lo < 0 || hi >= self.n_batch {
                return Err(StandsError::BatchIdOutOfRange {
                    n_batch: self.n_batch,
                    lo,
                    hi,
                });
            }
        }

        Ok(z - self.style.index_select(0, &ids))
    }

    pub fn n_batch(&self) -> i64 {
        self.n_batch
    }

    pub fn style(&self) -> &Tensor {
        &self.style
    }
}
