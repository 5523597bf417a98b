//! Weight-file save/load utilities
//!
//! A weight file is a flat `{parameter name: tensor}` mapping, either
//! safetensors (`.safetensors`) or libtorch's multi-tensor format (anything else).
//! Loading merges key-wise into a live `VarStore`: matching names are
//! overwritten, unknown names are ignored, and any shape disagreement aborts
//! the load before a single parameter is touched.

use std::path::{Path, PathBuf};

use tch::{nn, Tensor};
use tracing::{debug, info};

use crate::error::{Result, StandsError};

/// Outcome of a partial weight merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightMergeReport {
    /// Parameters overwritten from the file
    pub loaded: Vec<String>,
    /// Names in the file with no matching parameter
    pub ignored: Vec<String>,
}

fn is_safetensors(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("safetensors")
}

fn load_error(path: &Path, reason: impl Into<String>) -> StandsError {
    StandsError::WeightLoad {
        path: PathBuf::from(path),
        reason: reason.into(),
    }
}

/// Read every named tensor from a weight file (tensors land on the CPU)
pub fn read_weight_file(path: impl AsRef<Path>) -> Result<Vec<(String, Tensor)>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(load_error(path, "file not found"));
    }

    let named = if is_safetensors(path) {
        Tensor::read_safetensors(path)
    } else {
        Tensor::load_multi(path)
    };
    named.map_err(|e| load_error(path, e.to_string()))
}

/// Write every variable of `vs` to `path`
pub fn write_weight_file(vs: &nn::VarStore, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut named: Vec<(String, Tensor)> = vs.variables().into_iter().collect();
    named.sort_by(|a, b| a.0.cmp(&b.0));

    if is_safetensors(path) {
        Tensor::write_safetensors(&named, path)?;
    } else {
        Tensor::save_multi(&named, path)?;
    }

    info!("Saved {} parameters to {}", named.len(), path.display());
    Ok(())
}

/// Merge named tensors into the variables of `vs`
pub fn merge_weights(
    vs: &mut nn::VarStore,
    named: Vec<(String, Tensor)>,
    source: &Path,
) -> Result<WeightMergeReport> {
    let mut variables = vs.variables();

    for (name, tensor) in &named {
        if let Some(current) = variables.get(name) {
            if current.size() != tensor.size() {
                return Err(load_error(
                    source,
                    format!(
                        "parameter {} has shape {:?}, file holds {:?}",
                        name,
                        current.size(),
                        tensor.size()
                    ),
                ));
            }
        }
    }

    let mut report = WeightMergeReport::default();
    tch::no_grad(|| -> Result<()> {
        for (name, tensor) in &named {
            match variables.get_mut(name) {
                Some(current) => {
                    current.f_copy_(tensor)?;
                    report.loaded.push(name.clone());
                }
                None => {
                    debug!("Ignoring weight {} with no matching parameter", name);
                    report.ignored.push(name.clone());
                }
            }
        }
        Ok(())
    })?;

    info!(
        "Loaded {} parameters from {} ({} ignored)",
        report.loaded.len(),
        source.display(),
        report.ignored.len()
    );
    Ok(report)
}

/// Read a weight file and merge it into `vs`
pub fn load_weights_into(vs: &mut nn::VarStore, path: impl AsRef<Path>) -> Result<WeightMergeReport> {
    let path = path.as_ref();
    let named = read_weight_file(path)?;
    merge_weights(vs, named, path)
}
