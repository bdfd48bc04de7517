//! Drive tuning parameters and their defaults

use core::fmt;

use crate::rotor::SensorWiring;

/// Proportional gain of the speed regulator (empirically tuned)
pub const DEFAULT_SPEED_KP: f32 = 0.013;
/// Derivative gain of the speed regulator (empirically tuned)
pub const DEFAULT_SPEED_KD: f32 = 0.000742;

/// Regulator tick period [ms]. A tick runs once more than this has elapsed.
pub const DEFAULT_CONTROL_PERIOD_MS: u32 = 30;

/// No sensor edge for this long means the rotor is considered stopped [µs]
pub const DEFAULT_EDGE_TIMEOUT_US: u64 = 500_000;

/// Rising sensor edges per mechanical revolution (3 per electrical revolution, 2 pole pairs)
pub const DEFAULT_EDGES_PER_REVOLUTION: u32 = 6;

/// Rotation-hold outer loop gain [velocity per remaining revolution]
pub const DEFAULT_ROTATION_KP: f32 = 4.0;

/// Rotation-hold speed cap when the command carries no velocity
pub const DEFAULT_VELOCITY_CAP: f32 = 20.0;

/// Homing: duty-cycle scale while holding drive state 0
pub const HOMING_SCALE: f32 = 1.0;
/// Homing: mechanical settling dwell [ms]
pub const HOMING_DWELL_MS: u64 = 1_000;

/// Terminal command buffer length [bytes]
pub const COMMAND_BUFFER_LEN: usize = 48;

/// PWM設定
pub mod pwm {
    /// Carrier frequency at startup [Hz] (note `c`)
    pub const DEFAULT_FREQUENCY_HZ: u32 = 4_186;
}

/// Configuration validation errors
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A gain is negative, NaN or infinite
    InvalidGain,
    /// Control period must be non-zero
    ZeroControlPeriod,
    /// Edges per revolution must be non-zero
    ZeroEdgesPerRevolution,
    /// Velocity cap must be finite and positive
    InvalidVelocityCap,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGain => f.write_str("gain must be finite and non-negative"),
            Self::ZeroControlPeriod => f.write_str("control period must be non-zero"),
            Self::ZeroEdgesPerRevolution => f.write_str("edges per revolution must be non-zero"),
            Self::InvalidVelocityCap => f.write_str("velocity cap must be finite and positive"),
        }
    }
}

/// Runtime drive configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriveConfig {
    pub kp: f32,
    pub kd: f32,
    pub control_period_ms: u32,
    pub edge_timeout_us: u64,
    pub edges_per_revolution: u32,
    pub rotation_kp: f32,
    pub default_velocity_cap: f32,
    pub sensor_wiring: SensorWiring,
}

impl DriveConfig {
    pub const fn new() -> Self {
        Self {
            kp: DEFAULT_SPEED_KP,
            kd: DEFAULT_SPEED_KD,
            control_period_ms: DEFAULT_CONTROL_PERIOD_MS,
            edge_timeout_us: DEFAULT_EDGE_TIMEOUT_US,
            edges_per_revolution: DEFAULT_EDGES_PER_REVOLUTION,
            rotation_kp: DEFAULT_ROTATION_KP,
            default_velocity_cap: DEFAULT_VELOCITY_CAP,
            sensor_wiring: SensorWiring::Standard,
        }
    }

    /// Check the configuration before the control loop starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        let gain_ok = |g: f32| g.is_finite() && g >= 0.0;
        if !gain_ok(self.kp) || !gain_ok(self.kd) || !gain_ok(self.rotation_kp) {
            return Err(ConfigError::InvalidGain);
        }
        if self.control_period_ms == 0 {
            return Err(ConfigError::ZeroControlPeriod);
        }
        if self.edges_per_revolution == 0 {
            return Err(ConfigError::ZeroEdgesPerRevolution);
        }
        if !self.default_velocity_cap.is_finite() || self.default_velocity_cap <= 0.0 {
            return Err(ConfigError::InvalidVelocityCap);
        }
        Ok(())
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self::new()
    }
}
