//! Sensored BLDC six-step drive
//!
//! Hardware-independent part of the drive: sensor decoding, commutation,
//! edge timing, velocity estimation, speed regulation and the terminal
//! command protocol. The `sixstep-firmware` crate binds it to the MCU.
#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod calibration;
pub mod commutation;
pub mod controller;
pub mod edge;
pub mod params;
pub mod protocol;
pub mod rotor;
pub mod state;
pub mod velocity;

pub use calibration::{CalibrationError, Homing};
pub use commutation::{CommutationEngine, DriveOutput, Lead, PhaseChannel, PhaseOutputs};
pub use controller::{ControlLoop, PdController, SpeedController, TickReport};
pub use edge::{Direction, EdgeTracker, Sensor};
pub use params::{ConfigError, DriveConfig};
pub use protocol::{Command, LineBuffer, Note, ParseError};
pub use rotor::{RotorState, SensorWiring};
pub use state::{ControlCommand, DriveState, Status};
