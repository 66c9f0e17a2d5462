//! # Device Detection and Management
//!
//! Handles selection of the compute device (CPU/GPU) for model inference.
//! The DEVICE configuration value maps onto a preference here; anything
//! that asks for an unavailable accelerator falls back to CPU.

use candle_core::Device;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Cached best available device to avoid repeated detection
static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

/// Device preferences for model inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Automatically select the best available device
    Auto,
    /// Force CPU usage
    #[default]
    Cpu,
    /// Force CUDA GPU usage (will fallback to CPU if not available)
    Cuda,
    /// Force Metal GPU usage (will fallback to CPU if not available)
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

impl DevicePreference {
    /// Resolve the preference into a concrete candle device.
    pub fn device(self) -> Device {
        match self {
            DevicePreference::Auto => best_device().clone(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => cuda_device().unwrap_or(Device::Cpu),
            DevicePreference::Metal => metal_device().unwrap_or(Device::Cpu),
        }
    }
}

/// Get the best available device (cached after first detection).
pub fn best_device() -> &'static Device {
    BEST_DEVICE.get_or_init(|| {
        info!("Detecting best available compute device...");

        if let Some(device) = cuda_device() {
            info!("Selected CUDA GPU for inference");
            return device;
        }

        if let Some(device) = metal_device() {
            info!("Selected Metal GPU for inference");
            return device;
        }

        info!("Using CPU for inference (no GPU acceleration available)");
        Device::Cpu
    })
}

fn cuda_device() -> Option<Device> {
    match Device::new_cuda(0) {
        Ok(device) => {
            debug!("CUDA device 0 available");
            Some(device)
        }
        Err(e) => {
            debug!("CUDA not available: {}", e);
            None
        }
    }
}

fn metal_device() -> Option<Device> {
    match Device::new_metal(0) {
        Ok(device) => {
            debug!("Metal device 0 available");
            Some(device)
        }
        Err(e) => {
            debug!("Metal not available: {}", e);
            None
        }
    }
}
