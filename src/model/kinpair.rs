//! Linear reconstruction of target latents from reference latents
//!
//! `KinPair` learns a non-negative `[n_tgt, n_ref]` mixing matrix; each target
//! latent is rebuilt as a weighted sum of the reference latents. The rectified
//! matrix is also returned as a host-side snapshot for inspection.

use ndarray::Array2;
use tch::{nn, Device, Tensor};

use crate::error::{Result, StandsError};
use crate::training::reconstruction_loss;

/// Result of [`KinPair::forward`]
#[derive(Debug)]
pub struct KinPairOutput {
    /// `relu(mapping) · z_ref`, shape `[n_tgt, latent_dim]`
    pub fake_z_tgt: Tensor,
    /// The target latents, passed through unchanged
    pub z_tgt: Tensor,
    /// Detached CPU copy of `relu(mapping)`, shape `[n_tgt, n_ref]`
    pub mapping: Array2<f32>,
}

#[derive(Debug)]
pub struct KinPair {
    mapping: Tensor,
    n_ref: i64,
    n_tgt: i64,
}

impl KinPair {
    /// Mapping initialised uniformly in `±1/√n_ref`
    pub fn new(vs: &nn::Path, n_ref: i64, n_tgt: i64) -> Result<Self> {
        if n_ref <= 0 || n_tgt <= 0 {
            return Err(StandsError::InvalidConfig(format!(
                "KinPair needs n_ref > 0 and n_tgt > 0, got {} and {}",
                n_ref, n_tgt
            )));
        }

        let bound = 1.0 / (n_ref as f64).sqrt();
        let mapping = vs.var(
            "mapping",
            &[n_tgt, n_ref],
            nn::Init::Uniform {
                lo: -bound,
                up: bound,
            },
        );
        Ok(Self {
            mapping,
            n_ref,
            n_tgt,
        })
    }

    pub fn forward(&self, z_ref: &Tensor, z_tgt: &Tensor) -> Result<KinPairOutput> {
        let size = z_ref.size();
        if size.len() != 2 || size[0] != self.n_ref {
            return Err(StandsError::shape("reference latents", &[self.n_ref, -1], &size));
        }

        let weights = self.mapping.relu();
        let fake_z_tgt = weights.matmul(z_ref);

        let snapshot = weights.detach().to_device(Device::Cpu);
        let values = Vec::<f32>::try_from(snapshot.flatten(0, -1))?;
        let mapping = Array2::from_shape_vec((self.n_tgt as usize, self.n_ref as usize), values)?;

        Ok(KinPairOutput {
            fake_z_tgt,
            z_tgt: z_tgt.shallow_clone(),
            mapping,
        })
    }

    /// MSE between the reconstructed and the actual target latents
    pub fn reconstruction_loss(&self, output: &KinPairOutput) -> Result<Tensor> {
        reconstruction_loss(&output.fake_z_tgt, &output.z_tgt)
    }

    /// Raw (unrectified) mapping parameter
    pub fn mapping(&self) -> &Tensor {
        &self.mapping
    }

    pub fn n_ref(&self) -> i64 {
        self.n_ref
    }

    pub fn n_tgt(&self) -> i64 {
        self.n_tgt
    }
}
