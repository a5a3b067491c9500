//! Device and dtype selection

use crate::config::{DeviceChoice, Precision};
use crate::error::LoadError;
use candle_core::{DType, Device};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cuda,
    Cpu,
}

#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub device: Device,
    pub kind: DeviceKind,
}

impl DeviceProfile {
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            kind: DeviceKind::Cpu,
        }
    }

    /// Open the configured device
    pub fn select(choice: DeviceChoice) -> Result<Self, LoadError> {
        let profile = match choice {
            DeviceChoice::Cpu => Self::cpu(),
            DeviceChoice::Cuda => Self {
                device: Device::new_cuda(0)?,
                kind: DeviceKind::Cuda,
            },
            DeviceChoice::Auto => {
                let device = Device::cuda_if_available(0)?;
                let kind = if device.is_cuda() {
                    DeviceKind::Cuda
                } else {
                    DeviceKind::Cpu
                };
                Self { device, kind }
            }
        };

        tracing::info!(device = ?profile.kind, "Selected compute device");
        Ok(profile)
    }

    /// Resolve the load dtype.
    ///
    /// CPU always runs in F32: the half-precision CPU kernels are far slower and
    /// not every op has a bf16 path. `Auto` on CUDA follows the checkpoint's
    /// `torch_dtype`, defaulting to BF16.
    pub fn select_dtype(&self, precision: Precision, checkpoint_dtype: Option<&str>) -> DType {
        if self.kind == DeviceKind::Cpu {
            if !matches!(precision, Precision::Auto | Precision::Fp32) {
                tracing::warn!(precision = ?precision, "CPU device: loading in F32 instead");
            }
            return DType::F32;
        }

        match precision {
            Precision::Bf16 => DType::BF16,
            Precision::Fp16 => DType::F16,
            Precision::Fp32 => DType::F32,
            Precision::Auto => match checkpoint_dtype {
                Some("float16") => DType::F16,
                Some("float32") => DType::F32,
                _ => DType::BF16,
            },
        }
    }
}
