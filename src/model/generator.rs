//! Generators
//!
//! `GeneratorAD` reconstructs entities through an extractor and a memory
//! block; entities the memory cannot represent reconstruct poorly, which is
//! the anomaly signal. `GeneratorBC` reuses a trained extractor and subtracts
//! a learned per-batch style from the gene latent for batch correction.

use std::path::{Path, PathBuf};

use ndarray::Array1;
use tch::{nn, Device, Tensor};
use tracing::info;

use super::backbone::{Backbone, GeneCoder, MemoryBlock, StyleBlock};
use super::{ForwardMode, Modality};
use crate::data::{FeatureBatch, GraphBlock};
use crate::error::{Result, StandsError};
use crate::training::anomaly_score;
use crate::utils::{
    load_weights_into, write_weight_file, Config, MemoryConfig, ModelConfig, RuntimeContext,
    WeightMergeReport,
};

/// Output of a generator forward pass
#[derive(Debug)]
pub struct Reconstruction {
    /// Latent before the memory block; both halves in full mode
    pub z: Tensor,
    /// Reconstructed gene features `[N, gene_dim]`
    pub feat_g: Tensor,
    /// Reconstructed patches `[N, C, P, P]`, full mode only
    pub feat_p: Option<Tensor>,
}

/// Memory-augmented reconstruction generator for anomaly detection
///
/// Parameters live in the generator's own `VarStore`, named `extract.*` for
/// the extractor and `memory.*` for the memory block.
pub struct GeneratorAD {
    vs: nn::VarStore,
    extract: Backbone,
    memory: MemoryBlock,
    z_dim: i64,
}

impl GeneratorAD {
    /// Build a generator on `device`
    ///
    /// The extractor variant follows `config.only_st` / `config.only_sc`;
    /// setting both is an error. When `config.weights` is set, those weights
    /// are merged in before returning.
    pub fn new(device: Device, config: &ModelConfig, memory: &MemoryConfig) -> Result<Self> {
        config.validate()?;
        memory.validate()?;

        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let extract = Backbone::new(&(&root / "extract"), config)?;
        let z_dim = extract.latent_dim();
        let memory = MemoryBlock::new(&(&root / "memory"), z_dim, memory);

        let mut generator = Self {
            vs,
            extract,
            memory,
            z_dim,
        };
        info!(
            "Built {} generator: z_dim={}, {} parameters on {:?}",
            generator.modality(),
            z_dim,
            generator.num_parameters(),
            device
        );

        if let Some(path) = &config.weights {
            generator.load_weight(Some(path.as_path()))?;
        }
        Ok(generator)
    }

    /// Build from a full configuration on the context's device
    pub fn from_config(ctx: &RuntimeContext, config: &Config) -> Result<Self> {
        Self::new(ctx.device(), &config.model, &config.memory)
    }

    /// Single entry point; `mode` must match the constructed modality
    pub fn forward(&self, mode: ForwardMode, batch: &FeatureBatch) -> Result<Reconstruction> {
        self.modality().check(mode)?;
        batch.validate()?;

        match mode {
            ForwardMode::Full => {
                let (z, feat_g, feat_p) =
                    self.full_forward(batch.require_graph()?, &batch.feat_g, batch.require_patches()?)?;
                Ok(Reconstruction {
                    z,
                    feat_g,
                    feat_p: Some(feat_p),
                })
            }
            ForwardMode::SpatialOnly => {
                let (z, feat_g) = self.st_forward(batch.require_graph()?, &batch.feat_g)?;
                Ok(Reconstruction {
                    z,
                    feat_g,
                    feat_p: None,
                })
            }
            ForwardMode::SingleCellOnly => {
                let (z, feat_g) = self.sc_forward(&batch.feat_g)?;
                Ok(Reconstruction {
                    z,
                    feat_g,
                    feat_p: None,
                })
            }
        }
    }

    /// Encode both modalities, fuse, decode.
    ///
    /// The memory block is bypassed here: the fused latent is split and
    /// decoded as is. Returns `(z, feat_g, feat_p)` with `z` of width `z_dim`.
    pub fn full_forward(
        &self,
        graph: &GraphBlock,
        feat_g: &Tensor,
        feat_p: &Tensor,
    ) -> Result<(Tensor, Tensor, Tensor)> {
        let Backbone::Full(extract) = &self.extract else {
            return Err(self.unsupported(ForwardMode::Full));
        };

        let (z_g, z_p) = extract.encode(graph, feat_g, feat_p)?;
        let (z_g, z_p) = extract.fusion(&z_g, &z_p);
        let z = Tensor::cat(&[z_g, z_p], -1);

        let halves = z.chunk(2, -1);
        let (feat_g, feat_p) = extract.decode(&halves[0], &halves[1]);
        Ok((z, feat_g, feat_p))
    }

    /// Graph encode, memory, decode. Returns `(z, feat_g)`.
    pub fn st_forward(&self, graph: &GraphBlock, feat_g: &Tensor) -> Result<(Tensor, Tensor)> {
        let Backbone::Spatial(extract) = &self.extract else {
            return Err(self.unsupported(ForwardMode::SpatialOnly));
        };

        let z = extract.encode(graph, feat_g)?;
        let mem_z = self.memory.forward(&z)?;
        Ok((z, extract.decode(&mem_z)))
    }

    /// Tabular encode, memory, decode. Returns `(z, feat_g)`.
    pub fn sc_forward(&self, feat_g: &Tensor) -> Result<(Tensor, Tensor)> {
        let Backbone::SingleCell(extract) = &self.extract else {
            return Err(self.unsupported(ForwardMode::SingleCellOnly));
        };

        let z = extract.encode(feat_g)?;
        let mem_z = self.memory.forward(&z)?;
        Ok((z, extract.decode(&mem_z)))
    }

    fn unsupported(&self, mode: ForwardMode) -> StandsError {
        StandsError::UnsupportedMode {
            mode: mode.name(),
            modality: self.modality().name(),
        }
    }

    /// Per-entity reconstruction error, computed without gradient tracking.
    ///
    /// In full mode the gene and patch errors are added.
    pub fn anomaly_scores(&self, mode: ForwardMode, batch: &FeatureBatch) -> Result<Array1<f32>> {
        let scores = tch::no_grad(|| -> Result<Tensor> {
            let rec = self.forward(mode, batch)?;
            let mut scores = anomaly_score(&rec.feat_g, &batch.feat_g)?;
            if let (Some(rec_p), Some(feat_p)) = (&rec.feat_p, &batch.feat_p) {
                scores = scores + anomaly_score(rec_p, feat_p)?;
            }
            Ok(scores)
        })?;

        let values = Vec::<f32>::try_from(scores.to_device(Device::Cpu))?;
        Ok(Array1::from_vec(values))
    }

    /// Packaged weight file used by `load_weight(None)`
    pub fn default_weight_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("assets")
            .join("generator.safetensors")
    }

    /// Merge pretrained weights into this generator.
    ///
    /// Parameters named in the file are overwritten, names the generator
    /// does not have are ignored. A missing or unreadable file, or a shape
    /// that differs from the live parameter, fails the whole load.
    pub fn load_weight(&mut self, path: Option<&Path>) -> Result<WeightMergeReport> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_weight_path);
        load_weights_into(&mut self.vs, &path)
    }

    /// Write every parameter to `path`
    pub fn save_weight(&self, path: impl AsRef<Path>) -> Result<()> {
        write_weight_file(&self.vs, path)
    }

    pub fn modality(&self) -> Modality {
        self.extract.modality()
    }

    /// Width of the full latent
    pub fn z_dim(&self) -> i64 {
        self.z_dim
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    pub fn num_parameters(&self) -> usize {
        self.vs.trainable_variables().iter().map(Tensor::numel).sum()
    }

    pub fn extractor(&self) -> &Backbone {
        &self.extract
    }

    pub fn memory(&self) -> &MemoryBlock {
        &self.memory
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}

/// Batch-correction generator: encode, subtract the batch style, decode
///
/// The extractor is shared (borrow a trained `GeneratorAD`'s extractor or
/// move one in); only the style parameters are created here.
pub struct GeneratorBC<E> {
    extractor: E,
    style: StyleBlock,
}

impl<E: GeneCoder> GeneratorBC<E> {
    /// `z_dim` must equal the extractor's gene-latent width
    pub fn new(vs: &nn::Path, extractor: E, n_batch: i64, z_dim: i64) -> Result<Self> {
        if extractor.z_dim() != z_dim {
            return Err(StandsError::InvalidConfig(format!(
                "style z_dim {} does not match the extractor's gene latent width {}",
                z_dim,
                extractor.z_dim()
            )));
        }
        let style = StyleBlock::new(&(vs / "style"), n_batch, z_dim)?;
        Ok(Self { extractor, style })
    }

    pub fn forward(&self, mode: ForwardMode, batch: &FeatureBatch, batch_ids: &Tensor) -> Result<Tensor> {
        batch.validate()?;
        match mode {
            ForwardMode::SpatialOnly => self.st_forward(batch.require_graph()?, &batch.feat_g, batch_ids),
            ForwardMode::SingleCellOnly => self.sc_forward(&batch.feat_g, batch_ids),
            ForwardMode::Full => Err(StandsError::UnsupportedMode {
                mode: mode.name(),
                modality: "batch-correction",
            }),
        }
    }

    /// Reconstructed `[N, gene_dim]` features of a spatial batch
    pub fn st_forward(&self, graph: &GraphBlock, feat_g: &Tensor, batch_ids: &Tensor) -> Result<Tensor> {
        let z = self.extractor.gene_encode(Some(graph), feat_g)?;
        let z = self.style.forward(&z, batch_ids)?;
        Ok(self.extractor.gene_decode(&z))
    }

    pub fn sc_forward(&self, feat_g: &Tensor, batch_ids: &Tensor) -> Result<Tensor> {
        let z = self.extractor.gene_encode(None, feat_g)?;
        let z = self.style.forward(&z, batch_ids)?;
        Ok(self.extractor.gene_decode(&z))
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    pub fn style(&self) -> &StyleBlock {
        &self.style
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Kind;

    fn small(only_st: bool, only_sc: bool) -> ModelConfig {
        ModelConfig {
            gene_dim: 12,
            patch_size: Some(8),
            patch_channels: 3,
            hidden_dim: 16,
            z_dim: 8,
            only_st,
            only_sc,
            weights: None,
        }
    }

    fn memory() -> MemoryConfig {
        MemoryConfig {
            mem_dim: 10,
            ..MemoryConfig::default()
        }
    }

    fn ring(n: i64) -> GraphBlock {
        let sources: Vec<i64> = (0..n).collect();
        let targets: Vec<i64> = (0..n).map(|i| (i + 1) % n).collect();
        GraphBlock::from_edges(&sources, &targets, n, Device::Cpu)
            .unwrap()
            .with_self_loops()
    }

    #[test]
    fn test_both_flags_rejected() {
        let result = GeneratorAD::new(Device::Cpu, &small(true, true), &memory());
        assert!(matches!(result, Err(StandsError::InvalidConfig(_))));
    }

    #[test]
    fn test_parameter_names() {
        let generator = GeneratorAD::new(Device::Cpu, &small(true, false), &memory()).unwrap();
        let names: Vec<String> = generator.var_store().variables().into_keys().collect();
        assert!(names.iter().any(|n| n == "memory.items"));
        assert!(names.iter().all(|n| n.starts_with("extract.") || n.starts_with("memory.")));
    }

    #[test]
    fn test_full_forward_bypasses_memory() {
        let generator = GeneratorAD::new(Device::Cpu, &small(false, false), &memory()).unwrap();
        let feat_g = Tensor::randn([4, 12], (Kind::Float, Device::Cpu));
        let feat_p = Tensor::rand([4, 3, 8, 8], (Kind::Float, Device::Cpu));
        let graph = ring(4);

        let (z, rec_g, rec_p) = generator.full_forward(&graph, &feat_g, &feat_p).unwrap();
        assert_eq!(z.size(), vec![4, 8]);

        let Backbone::Full(extract) = generator.extractor() else {
            panic!("expected the dual-modality extractor");
        };
        let halves = z.chunk(2, -1);
        let (direct_g, direct_p) = extract.decode(&halves[0], &halves[1]);
        assert!(rec_g.allclose(&direct_g, 1e-6, 1e-6, false));
        assert!(rec_p.allclose(&direct_p, 1e-6, 1e-6, false));
    }

    #[test]
    fn test_single_cell_forward_uses_memory() {
        let generator = GeneratorAD::new(Device::Cpu, &small(false, true), &memory()).unwrap();
        let feat = Tensor::randn([5, 12], (Kind::Float, Device::Cpu));

        let (z, rec) = generator.sc_forward(&feat).unwrap();
        assert_eq!(z.size(), vec![5, 8]);
        assert_eq!(rec.size(), vec![5, 12]);

        let Backbone::SingleCell(extract) = generator.extractor() else {
            panic!("expected the single-cell extractor");
        };
        let expected = extract.decode(&generator.memory().forward(&z).unwrap());
        assert!(rec.allclose(&expected, 1e-6, 1e-6, false));
    }

    #[test]
    fn test_mode_must_match_modality() {
        let generator = GeneratorAD::new(Device::Cpu, &small(true, false), &memory()).unwrap();
        let batch = FeatureBatch::single_cell(Tensor::randn([3, 12], (Kind::Float, Device::Cpu)));
        assert!(matches!(
            generator.forward(ForwardMode::SingleCellOnly, &batch),
            Err(StandsError::UnsupportedMode { .. })
        ));
        assert!(generator.sc_forward(&batch.feat_g).is_err());
    }

    #[test]
    fn test_spatial_forward_needs_graph() {
        let generator = GeneratorAD::new(Device::Cpu, &small(true, false), &memory()).unwrap();
        let batch = FeatureBatch::single_cell(Tensor::randn([3, 12], (Kind::Float, Device::Cpu)));
        assert!(matches!(
            generator.forward(ForwardMode::SpatialOnly, &batch),
            Err(StandsError::MissingInput(_))
        ));
    }

    #[test]
    fn test_anomaly_scores_per_entity() {
        let generator = GeneratorAD::new(Device::Cpu, &small(true, false), &memory()).unwrap();
        let batch = FeatureBatch::spatial(ring(6), Tensor::randn([6, 12], (Kind::Float, Device::Cpu)));

        let scores = generator.anomaly_scores(ForwardMode::SpatialOnly, &batch).unwrap();
        assert_eq!(scores.len(), 6);
        assert!(scores.iter().all(|&s| s >= 0.0));
    }

    #[test]
    fn test_batch_correction_shares_extractor() {
        let generator = GeneratorAD::new(Device::Cpu, &small(true, false), &memory()).unwrap();
        let style_vs = nn::VarStore::new(Device::Cpu);
        let bc = GeneratorBC::new(&style_vs.root(), generator.extractor(), 2, 8).unwrap();

        let feat = Tensor::randn([6, 12], (Kind::Float, Device::Cpu));
        let ids = Tensor::from_slice(&[0i64, 1, 0, 1, 1, 0]);
        let rec = bc.st_forward(&ring(6), &feat, &ids).unwrap();
        assert_eq!(rec.size(), vec![6, 12]);

        // Style parameters live apart from the generator
        assert_eq!(style_vs.trainable_variables().len(), 1);
        assert!(bc.sc_forward(&feat, &ids).is_err());
    }

    #[test]
    fn test_batch_correction_checks_latent_width() {
        let generator = GeneratorAD::new(Device::Cpu, &small(false, false), &memory()).unwrap();
        let style_vs = nn::VarStore::new(Device::Cpu);
        // The dual-modality gene latent is half of z_dim
        assert!(GeneratorBC::new(&style_vs.root(), generator.extractor(), 2, 8).is_err());
        assert!(GeneratorBC::new(&style_vs.root(), generator.extractor(), 2, 4).is_ok());
    }
}
