//! Memory block
//!
//! A learned bank of prototype latents. Each input latent is replaced by an
//! attention-weighted blend of the prototypes, so latents unlike anything in
//! the bank reconstruct poorly.

use tch::{nn, Kind, Tensor};

use crate::error::{Result, StandsError};
use crate::utils::MemoryConfig;

const SHRINK_EPS: f64 = 1e-12;

#[derive(Debug)]
pub struct MemoryBlock {
    items: Tensor,
    mem_dim: i64,
    z_dim: i64,
    shrink_thres: f64,
    temperature: f64,
}

impl MemoryBlock {
    /// `items` is `[mem_dim, z_dim]`, uniform in `±1/√z_dim`
    pub fn new(vs: &nn::Path, z_dim: i64, config: &MemoryConfig) -> Self {
        let bound = 1.0 / (z_dim as f64).sqrt();
        let items = vs.var(
            "items",
            &[config.mem_dim, z_dim],
            nn::Init::Uniform {
                lo: -bound,
                up: bound,
            },
        );
        Self {
            items,
            mem_dim: config.mem_dim,
            z_dim,
            shrink_thres: config.shrink_thres,
            temperature: config.temperature,
        }
    }

    /// Addressing weights `[N, mem_dim]`; each row sums to 1
    pub fn attention(&self, z: &Tensor) -> Result<Tensor> {
        let size = z.size();
        if size.len() != 2 || size[1] != self.z_dim {
            return Err(StandsError::shape("memory input", &[-1, self.z_dim], &size));
        }

        let att = (z.matmul(&self.items.tr()) / self.temperature).softmax(-1, Kind::Float);

        if self.shrink_thres <= 0.0 {
            return Ok(att);
        }

        let shifted = &att - self.shrink_thres;
        let att = shifted.relu() * &att / (shifted.abs() + SHRINK_EPS);
        let l1 = att.sum_dim_intlist(-1, true, Kind::Float).clamp_min(SHRINK_EPS);
        Ok(att / l1)
    }

    /// Blend of memory items, same shape as `z`
    pub fn forward(&self, z: &Tensor) -> Result<Tensor> {
        Ok(self.attention(z)?.matmul(&self.items))
    }

    pub fn items(&self) -> &Tensor {
        &self.items
    }

    pub fn mem_dim(&self) -> i64 {
        self.mem_dim
    }

    pub fn z_dim(&self) -> i64 {
        self.z_dim
    }
}
