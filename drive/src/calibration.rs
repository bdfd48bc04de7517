//! Rotor homing
//!
//! At power-up the stator is energized in drive state 0 at full scale. The
//! rotor snaps to the matching position, and after a dwell the decoded rotor
//! state becomes the commutation offset.

use core::fmt;

use crate::commutation::{drive_state, CommutationEngine, PhaseChannel, PhaseOutputs};
use crate::fmt::*;
use crate::rotor::{self, RotorState, SensorWiring};

/// Homing failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// Sensors read 0b000 or 0b111 after the dwell (raw vector)
    InvalidRotorState(u8),
    /// `poll` called before `start`
    NotStarted,
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRotorState(v) => write!(f, "invalid sensor vector {:#05b} at home position", v),
            Self::NotStarted => f.write_str("homing not started"),
        }
    }
}

/// Rotor state read at the home position
pub fn resolve_origin(vector: u8, wiring: SensorWiring) -> Result<RotorState, CalibrationError> {
    let state = rotor::decode(vector, wiring);
    if state.is_valid() {
        Ok(state)
    } else {
        Err(CalibrationError::InvalidRotorState(vector & 0x07))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HomingState {
    Idle,
    Aligning { started_us: u64 },
    Completed,
}

/// Homing sequence
pub struct Homing {
    state: HomingState,
    wiring: SensorWiring,
    scale: f32,
    dwell_us: u64,
}

impl Homing {
    /// # Arguments
    /// * `scale` - Duty of the aligning vector (0.0～1.0)
    /// * `dwell_ms` - Settling time before the sensors are read [ms]
    pub fn new(wiring: SensorWiring, scale: f32, dwell_ms: u64) -> Self {
        Self {
            state: HomingState::Idle,
            wiring,
            scale: scale.clamp(0.0, 1.0),
            dwell_us: dwell_ms * 1000,
        }
    }

    pub fn state(&self) -> HomingState {
        self.state
    }

    /// Energize drive state 0
    pub fn start<O: PhaseOutputs>(&mut self, outputs: &mut O, now_us: u64) {
        info!("Homing: aligning rotor, scale={}", self.scale);
        drive_state(outputs, 0, self.scale);
        self.state = HomingState::Aligning { started_us: now_us };
    }

    /// Advance the sequence.
    ///
    /// Returns `None` while the rotor settles. Once the dwell has passed the
    /// outputs are switched off and the aligned engine (or the error) is returned.
    pub fn poll<O: PhaseOutputs>(
        &mut self,
        now_us: u64,
        vector: u8,
        outputs: &mut O,
    ) -> Option<Result<CommutationEngine, CalibrationError>> {
        let started_us = match self.state {
            HomingState::Idle => return Some(Err(CalibrationError::NotStarted)),
            HomingState::Aligning { started_us } => started_us,
            HomingState::Completed => return None,
        };
        if now_us.saturating_sub(started_us) < self.dwell_us {
            return None;
        }

        for channel in PhaseChannel::ALL {
            outputs.set_duty(channel, 0.0);
        }
        self.state = HomingState::Completed;

        match resolve_origin(vector, self.wiring) {
            Ok(origin) => {
                info!("Homing: origin state {}", origin.as_u8());
                Some(Ok(CommutationEngine::new(origin)))
            }
            Err(e) => {
                error!("Homing failed: {}", e);
                Some(Err(e))
            }
        }
    }
}
