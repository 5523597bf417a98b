//! Modality of a constructed generator and the forward modes it serves

use std::fmt;

use crate::error::{Result, StandsError};

/// Which inputs a generator was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
    /// Spatial graph, gene features and registered image patches
    Full,
    /// Spatial graph and gene features
    SpatialOnly,
    /// Gene features without any graph
    SingleCellOnly,
}

impl Modality {
    /// Resolve the `only_st` / `only_sc` flags; setting both is rejected
    pub fn from_flags(only_st: bool, only_sc: bool) -> Result<Self> {
        match (only_st, only_sc) {
            (true, true) => Err(StandsError::InvalidConfig(
                "only_st and only_sc are mutually exclusive".to_string(),
            )),
            (true, false) => Ok(Modality::SpatialOnly),
            (false, true) => Ok(Modality::SingleCellOnly),
            (false, false) => Ok(Modality::Full),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Modality::Full => "full",
            Modality::SpatialOnly => "spatial-only",
            Modality::SingleCellOnly => "single-cell-only",
        }
    }

    /// The forward mode matching this modality
    pub fn forward_mode(&self) -> ForwardMode {
        match self {
            Modality::Full => ForwardMode::Full,
            Modality::SpatialOnly => ForwardMode::SpatialOnly,
            Modality::SingleCellOnly => ForwardMode::SingleCellOnly,
        }
    }

    pub fn supports(&self, mode: ForwardMode) -> bool {
        self.forward_mode() == mode
    }

    pub(crate) fn check(&self, mode: ForwardMode) -> Result<()> {
        if self.supports(mode) {
            Ok(())
        } else {
            Err(StandsError::UnsupportedMode {
                mode: mode.name(),
                modality: self.name(),
            })
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Forward entry point requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForwardMode {
    /// Encode both modalities, fuse, decode both
    Full,
    /// Graph encode, memory, decode
    SpatialOnly,
    /// Tabular encode, memory, decode
    SingleCellOnly,
}

impl ForwardMode {
    pub fn name(&self) -> &'static str {
        match self {
            ForwardMode::Full => "full",
            ForwardMode::SpatialOnly => "spatial-only",
            ForwardMode::SingleCellOnly => "single-cell-only",
        }
    }
}

impl fmt::Display for ForwardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
