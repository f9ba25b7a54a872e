// lib.rs

//! Modbus-TCP control of Fischer fan-coil units.
//!
//! One [`ModbusHost`] per `host:port` serializes every exchange on the bus;
//! [`Fancoil`] and [`TemperatureSensor`] poll and command individual units
//! through it. Hosts are shared through an explicit [`HostRegistry`].

mod codec;
mod config;
mod core;
mod fancoil;
mod modbus_tcp;
mod registry;
mod sensor;
mod transport;

use std::time::Duration;

pub use codec::{
    FanMode, HvacMode, decode_bcd_temperature, encode_target_temperature,
};
pub use config::{ConfigError, FancoilConfig, SensorConfig};
pub use self::core::{ModbusUnit, ModbusUnitBuilder, ModbusUnitError, RegisterType};
pub use fancoil::{
    CURRENT_TEMPERATURE_REGISTER, DeviceInfo, FAN_SPEED_REGISTER, Fancoil, FancoilError,
    FancoilState, MAX_TEMP, MIN_TEMP, OPERATING_MODE_REGISTER, POWER_COIL, PollTiming,
    TARGET_TEMPERATURE_REGISTER,
};
pub use modbus_tcp::{Connector, Link, ModbusTcpFrame, TcpConnector, TcpLink};
pub use registry::HostRegistry;
pub use sensor::TemperatureSensor;
pub use transport::{DEFAULT_PORT, Endpoint, ModbusHost};

#[derive(Debug, thiserror::Error)]
pub enum ModbusTransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Frame too short")]
    FrameTooShort,

    #[error("Frame too long: declared length {0}")]
    FrameTooLong(usize),

    #[error("Invalid protocol ID: {0}")]
    InvalidProtocolId(u16),

    #[error("Unit ID mismatch: expected {expected}, received {received}")]
    UnitIdMismatch { expected: u8, received: u8 },

    #[error("Transaction ID mismatch: expected {expected}, received {received}")]
    TransactionIdMismatch { expected: u16, received: u16 },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ModbusUnitError),
}
