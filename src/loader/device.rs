use crate::error::{Error, Result};
use candle_core::Device;
use std::fmt;
use std::str::FromStr;

/// Compute device requested for model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceChoice {
    /// First CUDA device when one is available, otherwise the CPU.
    #[default]
    Auto,
    Cpu,
    Cuda(usize),
}

impl DeviceChoice {
    pub fn select(self) -> Result<Device> {
        match self {
            DeviceChoice::Auto => Device::cuda_if_available(0).map_err(|e| {
                Error::ConfigError(format!("Failed to open CUDA device: {}", e))
            }),
            DeviceChoice::Cpu => Ok(Device::Cpu),
            DeviceChoice::Cuda(ordinal) => Device::new_cuda(ordinal).map_err(|e| {
                Error::ConfigError(format!("Failed to initialize CUDA device: {}", e))
            }),
        }
    }
}

impl FromStr for DeviceChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(DeviceChoice::Auto),
            "cpu" => Ok(DeviceChoice::Cpu),
            s if s.starts_with("cuda") => {
                let ordinal = match s.split_once(':') {
                    Some((_, ordinal)) => ordinal
                        .parse::<usize>()
                        .map_err(|_| Error::InvalidInput(format!("Invalid CUDA device: {}", s)))?,
                    None if s == "cuda" => 0,
                    None => return Err(Error::InvalidInput(format!("Invalid CUDA device: {}", s))),
                };
                Ok(DeviceChoice::Cuda(ordinal))
            }
            _ => Err(Error::InvalidInput(format!("Unknown device: {}", s))),
        }
    }
}

impl fmt::Display for DeviceChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceChoice::Auto => write!(f, "auto"),
            DeviceChoice::Cpu => write!(f, "cpu"),
            DeviceChoice::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
        }
    }
}
