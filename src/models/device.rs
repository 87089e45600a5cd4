use crate::config::{DevicePreference, OnnxConfig};
use crate::utils::error::VisionError;
use crate::Result;
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Compute device every session is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    /// Resolve the configured preference. Called once, at registry construction.
    pub fn resolve(preference: DevicePreference) -> Self {
        Self::resolve_with(preference, cuda_available)
    }

    fn resolve_with(preference: DevicePreference, probe: impl FnOnce() -> bool) -> Self {
        match preference {
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Auto => {
                if probe() {
                    Device::Cuda
                } else {
                    Device::Cpu
                }
            }
            DevicePreference::Cuda => {
                if probe() {
                    Device::Cuda
                } else {
                    tracing::warn!("CUDA requested but not available, falling back to CPU");
                    Device::Cpu
                }
            }
        }
    }

    /// True when inference runs on a GPU and must go through a [`DeviceGate`]
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Device::Cuda)
    }
}

fn cuda_available() -> bool {
    match CUDAExecutionProvider::default().is_available() {
        Ok(available) => available,
        Err(e) => {
            tracing::debug!("CUDA availability probe failed: {}", e);
            false
        }
    }
}

/// Session builder bound to `device`, shared by every model loader
pub fn session_builder(device: Device, onnx_config: &OnnxConfig) -> Result<SessionBuilder> {
    let level = match onnx_config.optimization_level {
        i32::MIN..=0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    };

    let mut builder = Session::builder()?
        .with_optimization_level(level)?
        .with_intra_threads(onnx_config.intra_threads)?;

    if device.is_accelerator() {
        builder = builder.with_execution_providers([CUDAExecutionProvider::default().build()])?;
    }

    Ok(builder)
}

/// Limits concurrent inference calls to what the device can take.
///
/// An accelerator gets a semaphore sized to its permit count; CPU inference is
/// not gated.
#[derive(Debug, Clone)]
pub struct DeviceGate {
    semaphore: Option<Arc<Semaphore>>,
}

impl DeviceGate {
    /// `accelerator_permits` is raised to at least one
    pub fn new(device: Device, accelerator_permits: usize) -> Self {
        let semaphore = device
            .is_accelerator()
            .then(|| Arc::new(Semaphore::new(accelerator_permits.max(1))));
        Self { semaphore }
    }

    /// Wait for a slot on the device. The permit is released when dropped.
    pub async fn acquire(&self) -> Result<Option<OwnedSemaphorePermit>> {
        match &self.semaphore {
            Some(semaphore) => Arc::clone(semaphore)
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| VisionError::Internal("Device gate closed".to_string())),
            None => Ok(None),
        }
    }

    /// Free slots, or `None` when the device is not gated
    pub fn available_permits(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_preference_never_probes() {
        let device = Device::resolve_with(DevicePreference::Cpu, || panic!("probed"));
        assert_eq!(device, Device::Cpu);
    }

    #[test]
    fn auto_follows_probe() {
        assert_eq!(Device::resolve_with(DevicePreference::Auto, || true), Device::Cuda);
        assert_eq!(Device::resolve_with(DevicePreference::Auto, || false), Device::Cpu);
    }

    #[test]
    fn missing_cuda_falls_back_to_cpu() {
        assert_eq!(Device::resolve_with(DevicePreference::Cuda, || false), Device::Cpu);
    }

    #[tokio::test]
    async fn cpu_gate_hands_out_no_permits() {
        let gate = DeviceGate::new(Device::Cpu, 1);
        assert!(gate.acquire().await.unwrap().is_none());
        assert_eq!(gate.available_permits(), None);
    }

    #[tokio::test]
    async fn accelerator_gate_serializes_to_permit_count() {
        let gate = DeviceGate::new(Device::Cuda, 1);

        let permit = gate.acquire().await.unwrap();
        assert!(permit.is_some());
        assert_eq!(gate.available_permits(), Some(0));

        drop(permit);
        assert_eq!(gate.available_permits(), Some(1));
    }
}
