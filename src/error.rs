use std::fmt;
use std::io;
use std::time::Duration;

/// Failure at the device boundary (driver load, enumeration or a power query).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    Unavailable(String),
    Query { device: String, reason: String },
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Unavailable(reason) => write!(f, "device backend unavailable: {}", reason),
            DeviceError::Query { device, reason } => {
                write!(f, "power query on {} failed: {}", device, reason)
            }
        }
    }
}

impl std::error::Error for DeviceError {}

#[derive(Debug)]
pub enum WattmonError {
    /// No accelerator could be selected. Raised before any task starts.
    NoDevice(String),
    /// A single power poll failed; the sampler stops but the run continues.
    DeviceRead(DeviceError),
    ChildSpawn { command: String, source: io::Error },
    ChildIo { command: String, source: io::Error },
    ChildTimeout { command: String, after: Duration },
    Interrupted,
    Sink(io::Error),
    /// The sampler task panicked or was aborted before reporting.
    SamplerAborted(String),
}

impl WattmonError {
    /// Process exit status for a run that ended with this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            WattmonError::Interrupted => 130,
            _ => 1,
        }
    }
}

impl fmt::Display for WattmonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WattmonError::NoDevice(reason) => write!(f, "no CUDA devices attached: {}", reason),
            WattmonError::DeviceRead(err) => write!(f, "{}", err),
            WattmonError::ChildSpawn { command, source } => {
                write!(f, "failed to launch '{}': {}", command, source)
            }
            WattmonError::ChildIo { command, source } => {
                write!(f, "failed to collect output of '{}': {}", command, source)
            }
            WattmonError::ChildTimeout { command, after } => {
                write!(f, "'{}' did not finish within {:?} and was killed", command, after)
            }
            WattmonError::Interrupted => write!(f, "interrupted"),
            WattmonError::Sink(err) => write!(f, "failed to write sample: {}", err),
            WattmonError::SamplerAborted(reason) => write!(f, "sampler task aborted: {}", reason),
        }
    }
}

impl std::error::Error for WattmonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WattmonError::DeviceRead(err) => Some(err),
            WattmonError::ChildSpawn { source, .. } | WattmonError::ChildIo { source, .. } => {
                Some(source)
            }
            WattmonError::Sink(err) => Some(err),
            _ => None,
        }
    }
}
