pub mod device;
pub mod sampler;
pub mod sink;

use chrono::Utc;
use serde::Serialize;

pub use device::{acquire_device, DeviceBackend, NvmlBackend, PowerSource};
pub use sampler::{ArmSignal, Sampler, SamplerHandle, SamplerReport};
pub use sink::{SampleFormat, SampleSink};

/// One power reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    /// Wall-clock nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub power_mw: u32,
}

impl Sample {
    pub fn now(power_mw: u32) -> Self {
        Sample {
            timestamp: now_ns(),
            power_mw,
        }
    }
}

pub fn now_ns() -> i64 {
    // Only out of range after the year 2262.
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
