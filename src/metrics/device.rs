use async_trait::async_trait;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{DeviceError, WattmonError};

/// A device whose instantaneous power draw can be polled.
#[async_trait]
pub trait PowerSource: Send + Sync {
    fn name(&self) -> &str;
    /// Current power usage in milliwatts.
    async fn power_usage(&self) -> Result<u32, DeviceError>;
}

/// Something that can enumerate and open power sources.
pub trait DeviceBackend {
    fn device_count(&self) -> Result<u32, DeviceError>;
    fn open(&self, index: u32) -> Result<Arc<dyn PowerSource>, DeviceError>;
}

/// Opens device `index`, failing with `NoDevice` when there is nothing to open.
pub fn acquire_device<B: DeviceBackend + ?Sized>(
    backend: &B,
    index: u32,
) -> Result<Arc<dyn PowerSource>, WattmonError> {
    let count = backend
        .device_count()
        .map_err(|e| WattmonError::NoDevice(e.to_string()))?;
    if count == 0 {
        return Err(WattmonError::NoDevice("device count is 0".to_string()));
    }
    if index >= count {
        return Err(WattmonError::NoDevice(format!(
            "device index {} out of range ({} available)",
            index, count
        )));
    }

    let device = backend
        .open(index)
        .map_err(|e| WattmonError::NoDevice(e.to_string()))?;
    info!("Sampling device {} ({} of {})", device.name(), index, count);
    Ok(device)
}

/// NVML context shared by every device opened from it.
///
/// NVML is shut down when the last `Arc<Nvml>` is dropped, so the backend and
/// its devices release the driver on every exit path without explicit cleanup.
pub struct NvmlBackend {
    nvml: Arc<Nvml>,
}

impl NvmlBackend {
    pub fn init() -> Result<Self, DeviceError> {
        let nvml = Nvml::init().map_err(|e| DeviceError::Unavailable(e.to_string()))?;
        debug!("NVML initialized");
        Ok(NvmlBackend {
            nvml: Arc::new(nvml),
        })
    }
}

impl DeviceBackend for NvmlBackend {
    fn device_count(&self) -> Result<u32, DeviceError> {
        self.nvml
            .device_count()
            .map_err(|e| DeviceError::Unavailable(e.to_string()))
    }

    fn open(&self, index: u32) -> Result<Arc<dyn PowerSource>, DeviceError> {
        let device = self
            .nvml
            .device_by_index(index)
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
        let name = match device.name() {
            Ok(name) => format!("{} #{}", name, index),
            Err(_) => format!("GPU #{}", index),
        };

        Ok(Arc::new(NvmlDevice {
            nvml: Arc::clone(&self.nvml),
            index,
            name,
        }))
    }
}

/// `nvml_wrapper::Device` borrows its `Nvml`, so the handle is looked up by
/// index on every query instead of being stored.
struct NvmlDevice {
    nvml: Arc<Nvml>,
    index: u32,
    name: String,
}

impl NvmlDevice {
    fn query_error(&self, err: NvmlError) -> DeviceError {
        DeviceError::Query {
            device: self.name.clone(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl PowerSource for NvmlDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn power_usage(&self) -> Result<u32, DeviceError> {
        let device = self
            .nvml
            .device_by_index(self.index)
            .map_err(|e| self.query_error(e))?;
        device.power_usage().map_err(|e| self.query_error(e))
    }
}
