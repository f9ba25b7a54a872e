//! Conversions between fan-coil domain values and raw register/coil values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Decodes a packed BCD word, least significant nibble first.
///
/// Nibbles above 9 are not rejected; they are weighted like any other digit.
pub fn decode_bcd_temperature(raw: u16) -> u16 {
    (raw & 0xF)
        + ((raw >> 4) & 0xF) * 10
        + ((raw >> 8) & 0xF) * 100
        + ((raw >> 12) & 0xF) * 1000
}

/// Rounds a requested setpoint to the whole-degree register value, halves
/// going to the even neighbour.
///
/// Returns `None` when the value cannot be represented in a register.
/// No clamping to the advertised setpoint range happens here.
pub fn encode_target_temperature(value: f64) -> Option<u16> {
    let rounded = value.round_ties_even();
    if rounded.is_finite() && (0.0..=u16::MAX as f64).contains(&rounded) {
        Some(rounded as u16)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Auto,
    Cool,
    Heat,
    Dry,
    FanOnly,
    Off,
}

impl HvacMode {
    pub const ALL: [HvacMode; 6] = [
        HvacMode::Auto,
        HvacMode::Cool,
        HvacMode::Heat,
        HvacMode::Dry,
        HvacMode::FanOnly,
        HvacMode::Off,
    ];

    /// Operating-mode register value. `Off` has none: it lives on the power coil.
    pub fn to_register(self) -> Option<u16> {
        match self {
            HvacMode::Auto => Some(0),
            HvacMode::Cool => Some(1),
            HvacMode::Dry => Some(2),
            HvacMode::Heat => Some(3),
            HvacMode::FanOnly => Some(4),
            HvacMode::Off => None,
        }
    }

    /// Combines the power coil and the operating-mode register.
    ///
    /// Power off always reads as `Off`. With power on, an unknown register
    /// value falls back to `Off` as well.
    pub fn from_registers(power: bool, raw: u16) -> HvacMode {
        if !power {
            return HvacMode::Off;
        }
        match raw {
            0 => HvacMode::Auto,
            1 => HvacMode::Cool,
            2 => HvacMode::Dry,
            3 => HvacMode::Heat,
            4 => HvacMode::FanOnly,
            _ => HvacMode::Off,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HvacMode::Auto => "auto",
            HvacMode::Cool => "cool",
            HvacMode::Heat => "heat",
            HvacMode::Dry => "dry",
            HvacMode::FanOnly => "fan_only",
            HvacMode::Off => "off",
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanMode {
    Auto,
    High,
    Medium,
    Low,
}

impl FanMode {
    /// Presentation order.
    pub const ALL: [FanMode; 4] = [FanMode::Low, FanMode::Medium, FanMode::High, FanMode::Auto];

    pub fn to_register(self) -> u16 {
        match self {
            FanMode::Auto => 0,
            FanMode::High => 1,
            FanMode::Medium => 2,
            FanMode::Low => 3,
        }
    }

    /// Unknown register values fall back to `Auto`.
    pub fn from_register(raw: u16) -> FanMode {
        match raw {
            1 => FanMode::High,
            2 => FanMode::Medium,
            3 => FanMode::Low,
            _ => FanMode::Auto,
        }
    }

    /// Unknown names fall back to `Auto`.
    pub fn from_name(name: &str) -> FanMode {
        match name {
            "high" => FanMode::High,
            "medium" => FanMode::Medium,
            "low" => FanMode::Low,
            _ => FanMode::Auto,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FanMode::Auto => "auto",
            FanMode::High => "high",
            FanMode::Medium => "medium",
            FanMode::Low => "low",
        }
    }
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
