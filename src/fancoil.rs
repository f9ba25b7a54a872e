//! Climate state of one fan-coil unit, polled and commanded over a shared
//! [`ModbusHost`].
//!
//! The refresh reads are independent exchanges paced by
//! [`PollTiming::step_delay`]. A failed read keeps the previously cached
//! value of that field only, so one cycle may mix fresh and stale fields.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::ModbusTransportError;
use crate::codec::{FanMode, HvacMode, decode_bcd_temperature, encode_target_temperature};
use crate::config::FancoilConfig;
use crate::registry::HostRegistry;
use crate::transport::ModbusHost;

pub const POWER_COIL: u16 = 1;
pub const TARGET_TEMPERATURE_REGISTER: u16 = 65;
pub const FAN_SPEED_REGISTER: u16 = 66;
pub const OPERATING_MODE_REGISTER: u16 = 67;
/// Input register, BCD encoded.
pub const CURRENT_TEMPERATURE_REGISTER: u16 = 73;

/// Advertised setpoint range in °C. Not enforced on writes.
pub const MIN_TEMP: u16 = 16;
pub const MAX_TEMP: u16 = 30;

#[derive(Debug, Error)]
pub enum FancoilError {
    #[error("transport failure: {0}")]
    Transport(#[from] ModbusTransportError),

    #[error("unit {unit_id} rejected write to address {address}")]
    WriteRejected { unit_id: u8, address: u16 },

    #[error("target temperature {0} cannot be written to a register")]
    InvalidTargetTemperature(f64),
}

/// Pauses the slave needs between consecutive exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Between the reads of one refresh.
    pub step_delay: Duration,
    /// After asserting power, before the operating mode is written.
    pub settle_delay: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(250),
            settle_delay: Duration::from_millis(300),
        }
    }
}

/// Last known state of a unit.
///
/// `hvac_mode` is the operating mode as last read or written;
/// [`presented_hvac_mode`](Self::presented_hvac_mode) folds in the power coil.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FancoilState {
    pub power: bool,
    pub hvac_mode: HvacMode,
    pub target_temperature: Option<u16>,
    pub fan_mode: FanMode,
    pub current_temperature: Option<u16>,
}

impl Default for FancoilState {
    fn default() -> Self {
        Self {
            power: false,
            hvac_mode: HvacMode::Off,
            target_temperature: None,
            fan_mode: FanMode::Low,
            current_temperature: None,
        }
    }
}

impl FancoilState {
    pub fn presented_hvac_mode(&self) -> HvacMode {
        if self.power { self.hvac_mode } else { HvacMode::Off }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub unit_id: u8,
    pub name: String,
    pub manufacturer: &'static str,
    pub model: &'static str,
}

pub struct Fancoil {
    host: Arc<ModbusHost>,
    unit_id: u8,
    name: String,
    timing: PollTiming,
    state: FancoilState,
}

impl Fancoil {
    /// `host` must already count this device as a subscriber.
    pub fn new(
        host: Arc<ModbusHost>,
        unit_id: u8,
        name: impl Into<String>,
        timing: PollTiming,
    ) -> Self {
        let name = name.into();
        debug!(unit_id, %name, "creating fancoil");
        Self {
            host,
            unit_id,
            name,
            timing,
            state: FancoilState::default(),
        }
    }

    pub fn attach(registry: &HostRegistry, config: &FancoilConfig) -> Self {
        let host = registry.acquire(&config.endpoint());
        Self::new(host, config.unit_id, config.name.clone(), config.poll_timing())
    }

    /// Gives the transport handle back to the registry.
    pub fn detach(self, registry: &HostRegistry) {
        debug!(unit_id = self.unit_id, "detaching fancoil");
        registry.release(&self.host);
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> String {
        format!("{}_fancoil", self.unit_id)
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            unit_id: self.unit_id,
            name: self.name.clone(),
            manufacturer: "Fischer",
            model: "Fancoil",
        }
    }

    pub fn state(&self) -> &FancoilState {
        &self.state
    }

    pub fn power(&self) -> bool {
        self.state.power
    }

    pub fn hvac_mode(&self) -> HvacMode {
        self.state.presented_hvac_mode()
    }

    pub fn hvac_modes(&self) -> &'static [HvacMode] {
        &HvacMode::ALL
    }

    pub fn fan_mode(&self) -> FanMode {
        self.state.fan_mode
    }

    pub fn fan_modes(&self) -> &'static [FanMode] {
        &FanMode::ALL
    }

    pub fn target_temperature(&self) -> Option<u16> {
        self.state.target_temperature
    }

    pub fn current_temperature(&self) -> Option<u16> {
        self.state.current_temperature
    }

    pub fn min_temp(&self) -> u16 {
        MIN_TEMP
    }

    pub fn max_temp(&self) -> u16 {
        MAX_TEMP
    }

    /// Whole degrees only.
    pub fn target_temperature_step(&self) -> f64 {
        1.0
    }

    /// Polls current temperature, setpoint, mode with power, and fan speed.
    ///
    /// Never fails: each read that does not produce a value is logged and
    /// leaves its cached field alone.
    pub async fn refresh(&mut self) {
        if let Some(raw) = self
            .read_register(CURRENT_TEMPERATURE_REGISTER, true, "current temperature")
            .await
        {
            self.state.current_temperature = Some(decode_bcd_temperature(raw));
        }
        sleep(self.timing.step_delay).await;

        if let Some(raw) = self
            .read_register(TARGET_TEMPERATURE_REGISTER, false, "target temperature")
            .await
        {
            self.state.target_temperature = Some(raw);
        }
        sleep(self.timing.step_delay).await;

        let mode = self
            .read_register(OPERATING_MODE_REGISTER, false, "operating mode")
            .await;
        sleep(self.timing.step_delay).await;
        let power = self.read_power().await;
        match (power, mode) {
            (Some(power), Some(mode)) => {
                self.state.power = power;
                self.state.hvac_mode = HvacMode::from_registers(power, mode);
            }
            _ => error!(unit_id = self.unit_id, "no response to reading hvac mode or power state"),
        }
        sleep(self.timing.step_delay).await;

        if let Some(raw) = self.read_register(FAN_SPEED_REGISTER, false, "fan mode").await {
            self.state.fan_mode = FanMode::from_register(raw);
        }
        sleep(self.timing.step_delay).await;

        debug!(
            unit_id = self.unit_id,
            current = ?self.state.current_temperature,
            target = ?self.state.target_temperature,
            mode = %self.hvac_mode(),
            fan = %self.state.fan_mode,
            power = self.state.power,
            "fancoil state refreshed"
        );
    }

    pub async fn set_power(&mut self, on: bool) -> Result<(), FancoilError> {
        self.write_coil(POWER_COIL, on).await?;
        self.state.power = on;
        Ok(())
    }

    pub async fn turn_on(&mut self) -> Result<(), FancoilError> {
        self.set_power(true).await
    }

    pub async fn turn_off(&mut self) -> Result<(), FancoilError> {
        self.set_power(false).await
    }

    /// Switches the unit to `mode`, asserting power first when needed.
    ///
    /// `Off` only clears the power coil. Any other mode sets the power coil
    /// if it is clear, waits [`PollTiming::settle_delay`], then writes the
    /// operating mode register unless the cached mode already matches.
    pub async fn set_hvac_mode(&mut self, mode: HvacMode) -> Result<(), FancoilError> {
        debug!(unit_id = self.unit_id, %mode, "setting hvac mode");

        let Some(raw) = mode.to_register() else {
            if self.state.power {
                self.set_power(false).await?;
            }
            self.state.hvac_mode = HvacMode::Off;
            return Ok(());
        };

        if !self.state.power {
            self.set_power(true).await?;
            sleep(self.timing.settle_delay).await;
        }

        if self.state.hvac_mode != mode {
            self.write_register(OPERATING_MODE_REGISTER, raw).await?;
            self.state.hvac_mode = mode;
        }
        Ok(())
    }

    /// Writes the setpoint rounded to whole degrees.
    pub async fn set_target_temperature(&mut self, value: f64) -> Result<(), FancoilError> {
        let raw = encode_target_temperature(value)
            .ok_or(FancoilError::InvalidTargetTemperature(value))?;

        if !(MIN_TEMP..=MAX_TEMP).contains(&raw) {
            warn!(
                unit_id = self.unit_id,
                raw,
                "target temperature outside {MIN_TEMP}..={MAX_TEMP}"
            );
        }

        debug!(unit_id = self.unit_id, raw, "setting target temperature");
        self.write_register(TARGET_TEMPERATURE_REGISTER, raw).await?;
        self.state.target_temperature = Some(raw);
        Ok(())
    }

    pub async fn set_fan_mode(&mut self, mode: FanMode) -> Result<(), FancoilError> {
        debug!(unit_id = self.unit_id, %mode, "setting fan mode");
        self.write_register(FAN_SPEED_REGISTER, mode.to_register()).await?;
        self.state.fan_mode = mode;
        Ok(())
    }

    async fn read_register(&self, address: u16, input: bool, what: &str) -> Option<u16> {
        let result = if input {
            self.host.read_input_registers(self.unit_id, address, 1).await
        } else {
            self.host.read_holding_registers(self.unit_id, address, 1).await
        };

        match result {
            Ok(Some(registers)) => {
                let first = registers.first().copied();
                if first.is_none() {
                    error!(unit_id = self.unit_id, address, "empty response reading {what}");
                }
                first
            }
            Ok(None) => {
                error!(unit_id = self.unit_id, address, "no valid response reading {what}");
                None
            }
            Err(e) => {
                error!(unit_id = self.unit_id, address, "error reading {what}: {e}");
                None
            }
        }
    }

    async fn read_power(&self) -> Option<bool> {
        match self.host.read_coil(self.unit_id, POWER_COIL).await {
            Ok(Some(power)) => Some(power),
            Ok(None) => {
                error!(
                    unit_id = self.unit_id,
                    address = POWER_COIL,
                    "no valid response reading power state"
                );
                None
            }
            Err(e) => {
                error!(
                    unit_id = self.unit_id,
                    address = POWER_COIL,
                    "error reading power state: {e}"
                );
                None
            }
        }
    }

    async fn write_register(&self, address: u16, value: u16) -> Result<(), FancoilError> {
        let result = self.host.write_register(self.unit_id, address, value).await;
        self.check_write(address, result)
    }

    async fn write_coil(&self, address: u16, value: bool) -> Result<(), FancoilError> {
        let result = self.host.write_coil(self.unit_id, address, value).await;
        self.check_write(address, result)
    }

    fn check_write(
        &self,
        address: u16,
        result: Result<bool, ModbusTransportError>,
    ) -> Result<(), FancoilError> {
        match result {
            Ok(true) => Ok(()),
            Ok(false) => {
                error!(unit_id = self.unit_id, address, "write rejected");
                Err(FancoilError::WriteRejected {
                    unit_id: self.unit_id,
                    address,
                })
            }
            Err(e) => {
                error!(unit_id = self.unit_id, address, "write failed: {e}");
                Err(e.into())
            }
        }
    }
}
