pub mod manager;
pub mod models;
pub mod supply;

pub use manager::DeviceManager;
pub use models::*;
pub use supply::PowerSupply;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not connected")]
    DeviceNotConnected,

    #[error("Operation failed: {0}")]
    OperationFailed(#[from] crate::serial::SerialError),

    #[error("Invalid voltage: {0}V")]
    InvalidVoltage(f64),

    #[error("Invalid current: {0}A")]
    InvalidCurrent(f64),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
