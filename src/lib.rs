pub mod benchmark;
pub mod config;
pub mod error;
pub mod metrics;

pub use benchmark::{harness, runner};
pub use config::MonitorConfig;
pub use error::{DeviceError, WattmonError};
