pub mod device;
pub mod serial;
pub mod telemetry;

pub use device::{DeviceError, DeviceManager, DeviceState, PowerSupply};
pub use serial::{SerialError, SimulatedSupply};
pub use telemetry::{CurrentChanged, CurrentMonitor};
