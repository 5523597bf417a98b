//! Feature extractors
//!
//! Three variants, one per modality:
//! - `ExtractorOnlyST`: graph-convolution encoder over spatial spots
//! - `ExtractorOnlySC`: plain MLP encoder over single cells
//! - `Extractor`: graph encoder for genes plus a convolutional patch encoder,
//!   joined by a gated cross-modal fusion

use tch::{nn, nn::Module, Tensor};

use super::layers::{DenseBlock, GraphConvLayer};
use crate::data::GraphBlock;
use crate::error::{Result, StandsError};
use crate::utils::ModelConfig;

/// Channels of the two patch convolutions
const PATCH_CHANNELS: [i64; 2] = [32, 64];
/// Spatial side of the pooled patch feature map
const PATCH_POOL: i64 = 4;

fn check_features(feat: &Tensor, gene_dim: i64) -> Result<i64> {
    let size = feat.size();
    if size.len() != 2 || size[1] != gene_dim {
        return Err(StandsError::shape("gene features", &[-1, gene_dim], &size));
    }
    Ok(size[0])
}

fn check_graph(graph: &GraphBlock, n: i64) -> Result<()> {
    if graph.num_nodes() != n {
        return Err(StandsError::EntityCountMismatch {
            graph: Some(graph.num_nodes()),
            features: n,
            patches: None,
        });
    }
    Ok(())
}

/// Two stacked graph convolutions with LeakyReLU in between
#[derive(Debug)]
pub struct GraphEncoder {
    conv1: GraphConvLayer,
    conv2: GraphConvLayer,
}

impl GraphEncoder {
    pub fn new(vs: &nn::Path, in_dim: i64, hidden_dim: i64, out_dim: i64) -> Self {
        Self {
            conv1: GraphConvLayer::new(&(vs / "conv1"), in_dim, hidden_dim),
            conv2: GraphConvLayer::new(&(vs / "conv2"), hidden_dim, out_dim),
        }
    }

    pub fn forward(&self, graph: &GraphBlock, feat: &Tensor) -> Tensor {
        let h = self.conv1.forward(feat, graph).leaky_relu();
        self.conv2.forward(&h, graph)
    }
}

/// Spatial-only extractor
#[derive(Debug)]
pub struct ExtractorOnlyST {
    gene_dim: i64,
    z_dim: i64,
    encoder: GraphEncoder,
    decoder: DenseBlock,
}

impl ExtractorOnlyST {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        Self {
            gene_dim: config.gene_dim,
            z_dim: config.z_dim,
            encoder: GraphEncoder::new(&(vs / "gene_encoder"), config.gene_dim, config.hidden_dim, config.z_dim),
            decoder: DenseBlock::new(
                &(vs / "gene_decoder"),
                &[config.z_dim, config.hidden_dim, config.gene_dim],
            ),
        }
    }

    /// `[N, gene_dim]` -> `[N, z_dim]`
    pub fn encode(&self, graph: &GraphBlock, feat: &Tensor) -> Result<Tensor> {
        let n = check_features(feat, self.gene_dim)?;
        check_graph(graph, n)?;
        Ok(self.encoder.forward(graph, feat))
    }

    pub fn decode(&self, z: &Tensor) -> Tensor {
        self.decoder.forward(z)
    }

    pub fn z_dim(&self) -> i64 {
        self.z_dim
    }
}

/// Single-cell-only extractor
#[derive(Debug)]
pub struct ExtractorOnlySC {
    gene_dim: i64,
    z_dim: i64,
    encoder: DenseBlock,
    decoder: DenseBlock,
}

impl ExtractorOnlySC {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        Self {
            gene_dim: config.gene_dim,
            z_dim: config.z_dim,
            encoder: DenseBlock::new(
                &(vs / "gene_encoder"),
                &[config.gene_dim, config.hidden_dim, config.z_dim],
            ),
            decoder: DenseBlock::new(
                &(vs / "gene_decoder"),
                &[config.z_dim, config.hidden_dim, config.gene_dim],
            ),
        }
    }

    pub fn encode(&self, feat: &Tensor) -> Result<Tensor> {
        check_features(feat, self.gene_dim)?;
        Ok(self.encoder.forward(feat))
    }

    pub fn decode(&self, z: &Tensor) -> Tensor {
        self.decoder.forward(z)
    }

    pub fn z_dim(&self) -> i64 {
        self.z_dim
    }
}

/// Convolutional encoder for `[N, C, P, P]` image patches
#[derive(Debug)]
struct PatchEncoder {
    conv1: nn::Conv2D,
    conv2: nn::Conv2D,
    fc: nn::Linear,
}

impl PatchEncoder {
    fn new(vs: &nn::Path, channels: i64, out_dim: i64) -> Self {
        let conv_config = nn::ConvConfig {
            stride: 2,
            padding: 1,
            ..Default::default()
        };
        Self {
            conv1: nn::conv2d(vs / "conv1", channels, PATCH_CHANNELS[0], 3, conv_config),
            conv2: nn::conv2d(vs / "conv2", PATCH_CHANNELS[0], PATCH_CHANNELS[1], 3, conv_config),
            fc: nn::linear(
                vs / "fc",
                PATCH_CHANNELS[1] * PATCH_POOL * PATCH_POOL,
                out_dim,
                Default::default(),
            ),
        }
    }

    fn forward(&self, patches: &Tensor) -> Tensor {
        patches
            .apply(&self.conv1)
            .leaky_relu()
            .apply(&self.conv2)
            .leaky_relu()
            .adaptive_avg_pool2d([PATCH_POOL, PATCH_POOL])
            .flatten(1, -1)
            .apply(&self.fc)
    }
}

/// Decodes a patch latent back to `[N, C, P, P]` intensities in (0, 1)
#[derive(Debug)]
struct PatchDecoder {
    mlp: DenseBlock,
    channels: i64,
    patch_size: i64,
}

impl PatchDecoder {
    fn new(vs: &nn::Path, in_dim: i64, hidden_dim: i64, channels: i64, patch_size: i64) -> Self {
        Self {
            mlp: DenseBlock::new(vs, &[in_dim, hidden_dim, channels * patch_size * patch_size]),
            channels,
            patch_size,
        }
    }

    fn forward(&self, z: &Tensor) -> Tensor {
        let n = z.size()[0];
        self.mlp
            .forward(z)
            .sigmoid()
            .view([n, self.channels, self.patch_size, self.patch_size])
    }
}

/// Gated exchange between the gene and patch latents
///
/// Each latent receives the other's projection, scaled by a sigmoid gate
/// computed from both.
#[derive(Debug)]
struct CrossFusion {
    gate: nn::Linear,
    patch_to_gene: nn::Linear,
    gene_to_patch: nn::Linear,
}

impl CrossFusion {
    fn new(vs: &nn::Path, half_dim: i64) -> Self {
        Self {
            gate: nn::linear(vs / "gate", 2 * half_dim, 2 * half_dim, Default::default()),
            patch_to_gene: nn::linear(vs / "patch_to_gene", half_dim, half_dim, Default::default()),
            gene_to_patch: nn::linear(vs / "gene_to_patch", half_dim, half_dim, Default::default()),
        }
    }

    fn forward(&self, z_g: &Tensor, z_p: &Tensor) -> (Tensor, Tensor) {
        let gates = Tensor::cat(&[z_g, z_p], -1).apply(&self.gate).sigmoid().chunk(2, -1);
        let z_g_out = z_g + &gates[0] * z_p.apply(&self.patch_to_gene).tanh();
        let z_p_out = z_p + &gates[1] * z_g.apply(&self.gene_to_patch).tanh();
        (z_g_out, z_p_out)
    }
}

/// Dual-modality extractor
#[derive(Debug)]
pub struct Extractor {
    gene_dim: i64,
    patch_channels: i64,
    patch_size: i64,
    half_dim: i64,
    gene_encoder: GraphEncoder,
    patch_encoder: PatchEncoder,
    fusion: CrossFusion,
    gene_decoder: DenseBlock,
    patch_decoder: PatchDecoder,
}

impl Extractor {
    /// Expects a validated full-mode config (even `z_dim`, `patch_size` set)
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Result<Self> {
        let patch_size = config.patch_size.filter(|&p| p > 0).ok_or_else(|| {
            StandsError::InvalidConfig("full mode needs a positive patch_size".to_string())
        })?;
        let half_dim = config.z_dim / 2;

        Ok(Self {
            gene_dim: config.gene_dim,
            patch_channels: config.patch_channels,
            patch_size,
            half_dim,
            gene_encoder: GraphEncoder::new(&(vs / "gene_encoder"), config.gene_dim, config.hidden_dim, half_dim),
            patch_encoder: PatchEncoder::new(&(vs / "patch_encoder"), config.patch_channels, half_dim),
            fusion: CrossFusion::new(&(vs / "fusion"), half_dim),
            gene_decoder: DenseBlock::new(
                &(vs / "gene_decoder"),
                &[half_dim, config.hidden_dim, config.gene_dim],
            ),
            patch_decoder: PatchDecoder::new(
                &(vs / "patch_decoder"),
                half_dim,
                config.hidden_dim,
                config.patch_channels,
                patch_size,
            ),
        })
    }

    fn check_patches(&self, feat_p: &Tensor, n: i64) -> Result<()> {
        let expected = [n, self.patch_channels, self.patch_size, self.patch_size];
        let size = feat_p.size();
        if size.as_slice() != expected {
            return Err(StandsError::shape("image patches", &expected, &size));
        }
        Ok(())
    }

    /// Encode both modalities into two `[N, z_dim / 2]` latents
    pub fn encode(&self, graph: &GraphBlock, feat_g: &Tensor, feat_p: &Tensor) -> Result<(Tensor, Tensor)> {
        let z_g = self.encode_genes(graph, feat_g)?;
        self.check_patches(feat_p, z_g.size()[0])?;
        Ok((z_g, self.patch_encoder.forward(feat_p)))
    }

    /// Gene path only, `[N, gene_dim]` -> `[N, z_dim / 2]`
    pub fn encode_genes(&self, graph: &GraphBlock, feat_g: &Tensor) -> Result<Tensor> {
        let n = check_features(feat_g, self.gene_dim)?;
        check_graph(graph, n)?;
        Ok(self.gene_encoder.forward(graph, feat_g))
    }

    pub fn fusion(&self, z_g: &Tensor, z_p: &Tensor) -> (Tensor, Tensor) {
        self.fusion.forward(z_g, z_p)
    }

    /// Decode to `([N, gene_dim], [N, C, P, P])`
    pub fn decode(&self, z_g: &Tensor, z_p: &Tensor) -> (Tensor, Tensor) {
        (self.gene_decoder.forward(z_g), self.patch_decoder.forward(z_p))
    }

    pub fn decode_genes(&self, z_g: &Tensor) -> Tensor {
        self.gene_decoder.forward(z_g)
    }

    /// Width of each modality's latent
    pub fn half_dim(&self) -> i64 {
        self.half_dim
    }

    pub fn z_dim(&self) -> i64 {
        2 * self.half_dim
    }
}
