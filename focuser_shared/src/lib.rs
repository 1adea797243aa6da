// focuser_shared: types and traits shared by the focuser host and the board simulator

pub mod config;
pub mod hardware_traits;
pub mod position_store;
pub mod protocol;

pub use hardware_traits::{AxisStatus, HardwareLink, LinkError, MotorDriver, TemperatureSource};
pub use position_store::{PositionStore, StoreError};
