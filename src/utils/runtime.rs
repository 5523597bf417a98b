//! Seeding and compute-device selection
//!
//! libtorch keeps its RNGs process-wide, so [`seed_everything`] mutates global
//! state. Everything host-side (graph sampling, shuffling) draws from
//! [`RuntimeContext::host_rng`] instead, which is derived from the same seed.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tch::{nn, Cuda, Device};
use tracing::{info, warn};

use crate::error::{Result, StandsError};

/// Logical device request
///
/// Mirrors the three accepted forms of the `gpu` setting: `true` picks the
/// first accelerator, `false` forces the CPU, a string names a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawGpuRequest", into = "RawGpuRequest")]
pub enum GpuRequest {
    /// First CUDA device if one is available
    Auto,
    /// Explicit device string such as `"cuda:1"` or `"cpu"`
    Explicit(String),
    /// Host CPU
    Cpu,
}

impl Default for GpuRequest {
    fn default() -> Self {
        GpuRequest::Auto
    }
}

impl From<bool> for GpuRequest {
    fn from(flag: bool) -> Self {
        if flag {
            GpuRequest::Auto
        } else {
            GpuRequest::Cpu
        }
    }
}

impl FromStr for GpuRequest {
    type Err = StandsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "true" | "auto" => Ok(GpuRequest::Auto),
            "false" | "" => Ok(GpuRequest::Cpu),
            other => {
                parse_device(other)?;
                Ok(GpuRequest::Explicit(other.to_string()))
            }
        }
    }
}

impl fmt::Display for GpuRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuRequest::Auto => write!(f, "auto"),
            GpuRequest::Explicit(s) => write!(f, "{}", s),
            GpuRequest::Cpu => write!(f, "cpu"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawGpuRequest {
    Flag(bool),
    Device(String),
}

impl From<RawGpuRequest> for GpuRequest {
    fn from(raw: RawGpuRequest) -> Self {
        match raw {
            RawGpuRequest::Flag(flag) => GpuRequest::from(flag),
            RawGpuRequest::Device(s) if s.trim().is_empty() => GpuRequest::Cpu,
            RawGpuRequest::Device(s) => GpuRequest::Explicit(s),
        }
    }
}

impl From<GpuRequest> for RawGpuRequest {
    fn from(request: GpuRequest) -> Self {
        match request {
            GpuRequest::Auto => RawGpuRequest::Flag(true),
            GpuRequest::Cpu => RawGpuRequest::Flag(false),
            GpuRequest::Explicit(s) => RawGpuRequest::Device(s),
        }
    }
}

/// Parse a device string (`cpu`, `cuda`, `gpu`, `cuda:N`, `mps`)
pub fn parse_device(s: &str) -> Result<Device> {
    let s = s.trim().to_lowercase();
    match s.as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => Ok(Device::Cuda(0)),
        "mps" => Ok(Device::Mps),
        other => other
            .strip_prefix("cuda:")
            .and_then(|idx| idx.parse::<usize>().ok())
            .map(Device::Cuda)
            .ok_or_else(|| StandsError::InvalidDevice(other.to_string())),
    }
}

/// Seed every libtorch RNG and turn off cuDNN autotuning.
///
/// The cuDNN benchmark mode picks kernels by timing, which makes repeated
/// runs diverge; it stays off after seeding.
pub fn seed_everything(seed: u64) {
    tch::manual_seed(seed as i64);
    Cuda::manual_seed_all(seed);
    Cuda::cudnn_set_benchmark(false);
    info!("Seeded libtorch RNGs with {}", seed);
}

/// Resolve a device request against the hardware actually present.
///
/// Falls back to the CPU with a warning when an accelerator was requested but
/// is not available.
pub fn select_device(request: &GpuRequest) -> Result<Device> {
    let device = match request {
        GpuRequest::Cpu => Device::Cpu,
        GpuRequest::Auto => {
            if Cuda::is_available() {
                Device::Cuda(0)
            } else {
                warn!("GPU isn't available, falling back to CPU");
                Device::Cpu
            }
        }
        GpuRequest::Explicit(s) => match parse_device(s)? {
            Device::Cuda(idx) if !Cuda::is_available() || idx >= Cuda::device_count() as usize => {
                warn!("Device {} isn't available, falling back to CPU", s);
                Device::Cpu
            }
            Device::Mps if !tch::utils::has_mps() => {
                warn!("Device {} isn't available, falling back to CPU", s);
                Device::Cpu
            }
            device => device,
        },
    };

    info!("Using device: {:?}", device);
    Ok(device)
}

/// Seed and device threaded explicitly through model construction
#[derive(Debug, Clone, Copy)]
pub struct RuntimeContext {
    seed: u64,
    device: Device,
}

impl RuntimeContext {
    /// Seed all RNGs and resolve the device
    pub fn new(seed: u64, gpu: &GpuRequest) -> Result<Self> {
        seed_everything(seed);
        let device = select_device(gpu)?;
        Ok(Self { seed, device })
    }

    /// Build a context from the runtime section of a [`Config`](super::Config)
    pub fn from_config(config: &super::config::RuntimeConfig) -> Result<Self> {
        Self::new(config.seed, &config.gpu)
    }

    /// Seeded CPU context
    pub fn cpu(seed: u64) -> Self {
        seed_everything(seed);
        Self {
            seed,
            device: Device::Cpu,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Host RNG for stream `stream`, reproducible for a given seed
    pub fn host_rng(&self, stream: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)))
    }

    /// Empty variable store on this context's device
    pub fn var_store(&self) -> nn::VarStore {
        nn::VarStore::new(self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_cpu_request_is_always_cpu() {
        assert_eq!(select_device(&GpuRequest::Cpu).unwrap(), Device::Cpu);
        assert_eq!(select_device(&GpuRequest::from(false)).unwrap(), Device::Cpu);
    }

    #[test]
    fn test_auto_request_without_cuda_falls_back() {
        let device = select_device(&GpuRequest::Auto).unwrap();
        if Cuda::is_available() {
            assert_eq!(device, Device::Cuda(0));
        } else {
            assert_eq!(device, Device::Cpu);
        }
    }

    #[test]
    fn test_parse_device() {
        assert_eq!(parse_device("cpu").unwrap(), Device::Cpu);
        assert_eq!(parse_device("CUDA").unwrap(), Device::Cuda(0));
        assert_eq!(parse_device("cuda:3").unwrap(), Device::Cuda(3));
        assert_eq!(parse_device("mps").unwrap(), Device::Mps);
        assert!(parse_device("tpu:0").is_err());
        assert!(parse_device("cuda:x").is_err());
    }

    #[test]
    fn test_gpu_request_from_str() {
        assert_eq!("true".parse::<GpuRequest>().unwrap(), GpuRequest::Auto);
        assert_eq!("false".parse::<GpuRequest>().unwrap(), GpuRequest::Cpu);
        assert_eq!(
            "cuda:1".parse::<GpuRequest>().unwrap(),
            GpuRequest::Explicit("cuda:1".to_string())
        );
        assert!("quantum".parse::<GpuRequest>().is_err());
    }

    #[test]
    fn test_gpu_request_serde() {
        let auto: GpuRequest = serde_json::from_str("true").unwrap();
        let cpu: GpuRequest = serde_json::from_str("false").unwrap();
        let explicit: GpuRequest = serde_json::from_str("\"cuda:0\"").unwrap();
        assert_eq!(auto, GpuRequest::Auto);
        assert_eq!(cpu, GpuRequest::Cpu);
        assert_eq!(explicit, GpuRequest::Explicit("cuda:0".to_string()));
        assert_eq!(serde_json::to_string(&GpuRequest::Cpu).unwrap(), "false");
    }

    #[test]
    fn test_explicit_cpu_string() {
        let device = select_device(&GpuRequest::Explicit("cpu".to_string())).unwrap();
        assert_eq!(device, Device::Cpu);
    }

    #[test]
    fn test_missing_accelerator_falls_back_to_cpu() {
        let cuda = select_device(&GpuRequest::Explicit("cuda:999".to_string())).unwrap();
        assert_eq!(cuda, Device::Cpu);

        let mps = select_device(&"mps".parse::<GpuRequest>().unwrap()).unwrap();
        if tch::utils::has_mps() {
            assert_eq!(mps, Device::Mps);
        } else {
            assert_eq!(mps, Device::Cpu);
        }
    }

    #[test]
    fn test_host_rng_streams() {
        let ctx = RuntimeContext {
            seed: 11,
            device: Device::Cpu,
        };
        let draw = |stream: u64| -> Vec<u64> {
            let mut rng = ctx.host_rng(stream);
            (0..4).map(|_| rng.gen()).collect()
        };

        assert_eq!(draw(0), draw(0));
        assert_ne!(draw(0), draw(1));
    }
}
