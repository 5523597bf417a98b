//! Configuration management
//!
//! Provides unified configuration for the generators, memory block and
//! gradient-penalty training signal.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::runtime::GpuRequest;
use crate::error::{Result, StandsError};
use crate::model::Modality;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Seed and device
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Extractor configuration
    pub model: ModelConfig,
    /// Memory block configuration
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Gradient penalty configuration
    #[serde(default)]
    pub training: PenaltyConfig,
}

/// Seed and device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Seed for every RNG
    pub seed: u64,
    /// `true`, `false` or a device string such as `"cuda:1"`
    pub gpu: GpuRequest,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            seed: 2023,
            gpu: GpuRequest::Auto,
        }
    }
}

/// Extractor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of genes per entity
    pub gene_dim: i64,
    /// Side length of the registered image patches (full mode only)
    pub patch_size: Option<i64>,
    /// Channels of the image patches
    pub patch_channels: i64,
    /// Hidden width of encoders and decoders
    pub hidden_dim: i64,
    /// Total latent width; split in two halves in full mode
    pub z_dim: i64,
    /// Spatial graph only, no image patches
    pub only_st: bool,
    /// Single-cell features only, no graph
    pub only_sc: bool,
    /// Pretrained weights merged at construction
    pub weights: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            gene_dim: 3000,
            patch_size: Some(32),
            patch_channels: 3,
            hidden_dim: 512,
            z_dim: 256,
            only_st: false,
            only_sc: false,
            weights: None,
        }
    }
}

impl ModelConfig {
    /// Spatial-only configuration
    pub fn spatial(gene_dim: i64) -> Self {
        Self {
            gene_dim,
            patch_size: None,
            only_st: true,
            ..Self::default()
        }
    }

    /// Single-cell-only configuration
    pub fn single_cell(gene_dim: i64) -> Self {
        Self {
            gene_dim,
            patch_size: None,
            only_sc: true,
            ..Self::default()
        }
    }

    /// Dual-modality configuration
    pub fn full(gene_dim: i64, patch_size: i64) -> Self {
        Self {
            gene_dim,
            patch_size: Some(patch_size),
            ..Self::default()
        }
    }

    /// Modality selected by the `only_st` / `only_sc` flags
    pub fn modality(&self) -> Result<Modality> {
        Modality::from_flags(self.only_st, self.only_sc)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let modality = self.modality()?;
        if self.gene_dim <= 0 {
            return Err(StandsError::InvalidConfig("gene_dim must be > 0".to_string()));
        }
        if self.hidden_dim <= 0 {
            return Err(StandsError::InvalidConfig("hidden_dim must be > 0".to_string()));
        }
        if self.z_dim <= 0 {
            return Err(StandsError::InvalidConfig("z_dim must be > 0".to_string()));
        }
        if modality == Modality::Full {
            if self.z_dim % 2 != 0 {
                return Err(StandsError::InvalidConfig(format!(
                    "z_dim must be even in full mode, got {}",
                    self.z_dim
                )));
            }
            match self.patch_size {
                Some(p) if p > 0 => {}
                _ => {
                    return Err(StandsError::InvalidConfig(
                        "full mode needs a positive patch_size".to_string(),
                    ))
                }
            }
            if self.patch_channels <= 0 {
                return Err(StandsError::InvalidConfig(
                    "patch_channels must be > 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Memory block configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Number of memory items
    pub mem_dim: i64,
    /// Addressing weights below this are zeroed (0 disables shrinkage)
    pub shrink_thres: f64,
    /// Softmax temperature of the addressing
    pub temperature: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            mem_dim: 512,
            shrink_thres: 0.005,
            temperature: 0.5,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mem_dim <= 0 {
            return Err(StandsError::InvalidConfig("mem_dim must be > 0".to_string()));
        }
        if self.shrink_thres < 0.0 {
            return Err(StandsError::InvalidConfig(
                "shrink_thres must be >= 0".to_string(),
            ));
        }
        if self.temperature <= 0.0 {
            return Err(StandsError::InvalidConfig(
                "temperature must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Gradient penalty configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Weight of the gradient penalty in the critic loss
    pub lambda_gp: f64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self { lambda_gp: 10.0 }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_toml(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from TOML or JSON depending on the file extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(path),
            _ => Self::from_json(path),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.memory.validate()?;
        if self.training.lambda_gp < 0.0 {
            return Err(StandsError::InvalidConfig(
                "lambda_gp must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}
