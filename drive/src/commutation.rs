//! Six-step commutation
//!
//! Maps a rotor state, shifted by the homing offset and the signed lead, to the
//! six half-bridge duty cycles.
//!
//! ```text
//! State   L1  L2  L3
//! 0       H   -   L
//! 1       -   H   L
//! 2       L   H   -
//! 3       L   -   H
//! 4       -   L   H
//! 5       H   L   -
//! 6       -   -   -
//! 7       -   -   -
//! ```

use crate::fmt::*;
use crate::rotor::RotorState;

/// Drive state to output mask. States 6 and 7 switch every output off.
pub const DRIVE_TABLE: [u8; 8] = [0x12, 0x18, 0x09, 0x21, 0x24, 0x06, 0x00, 0x00];

/// The six PWM outputs, in drive mask bit order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhaseChannel {
    L1Low = 0,
    L1High = 1,
    L2Low = 2,
    L2High = 3,
    L3Low = 4,
    L3High = 5,
}

impl PhaseChannel {
    pub const ALL: [PhaseChannel; 6] = [
        Self::L1Low,
        Self::L1High,
        Self::L2Low,
        Self::L2High,
        Self::L3Low,
        Self::L3High,
    ];

    /// Bit of this output in a [`DRIVE_TABLE`] mask
    pub const fn mask(self) -> u8 {
        1 << (self as u8)
    }

    /// Phase index 0..3
    pub const fn phase(self) -> usize {
        (self as usize) / 2
    }

    /// High-side switch of its phase
    pub const fn is_high(self) -> bool {
        (self as u8) & 1 == 1
    }
}

/// PWM peripheral seam: one duty cycle in [0, 1] per output
pub trait PhaseOutputs {
    fn set_duty(&mut self, channel: PhaseChannel, duty: f32);
}

/// Commutation lead angle. The sign selects the rotation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lead {
    Forward,
    Reverse,
}

impl Lead {
    /// Lead in drive steps (+2 / -2)
    pub const fn steps(self) -> i8 {
        match self {
            Self::Forward => 2,
            Self::Reverse => -2,
        }
    }

    pub const fn sign(self) -> f32 {
        match self {
            Self::Forward => 1.0,
            Self::Reverse => -1.0,
        }
    }

    /// Lead for a signed command; zero drives forward
    pub fn from_command(command: f32) -> Self {
        if command < 0.0 {
            Self::Reverse
        } else {
            Self::Forward
        }
    }
}

/// Drive state for a rotor state. Invalid rotor states stay invalid (all off).
#[inline(always)]
pub fn effective_state(rotor: RotorState, offset: RotorState, lead: Lead) -> u8 {
    if !rotor.is_valid() {
        return RotorState::INVALID.as_u8();
    }
    // +6 keeps the operand positive for every lead; rem_euclid covers rotor < offset with reverse lead
    (rotor.as_u8() as i8 - offset.as_u8() as i8 + lead.steps() + 6).rem_euclid(6) as u8
}

/// Duty cycles of the six outputs
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriveOutput {
    pub duty: [f32; 6],
}

impl DriveOutput {
    pub const OFF: Self = Self { duty: [0.0; 6] };

    pub fn from_mask(mask: u8, scale: f32) -> Self {
        let mut duty = [0.0; 6];
        for channel in PhaseChannel::ALL {
            if mask & channel.mask() != 0 {
                duty[channel as usize] = scale;
            }
        }
        Self { duty }
    }

    pub fn get(&self, channel: PhaseChannel) -> f32 {
        self.duty[channel as usize]
    }

    /// (low, high) duty of a phase 0..3
    pub fn phase(&self, phase: usize) -> (f32, f32) {
        (self.duty[phase * 2], self.duty[phase * 2 + 1])
    }
}

/// Commutation engine, aligned to the rotor origin found at homing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommutationEngine {
    offset: RotorState,
}

impl CommutationEngine {
    pub fn new(offset: RotorState) -> Self {
        if !offset.is_valid() {
            warn!("Commutation offset {} invalid, using 0", offset.as_u8());
            return Self {
                offset: RotorState::ORIGIN,
            };
        }
        Self { offset }
    }

    pub fn offset(&self) -> RotorState {
        self.offset
    }

    /// Drive the outputs for the current rotor state
    pub fn apply<O: PhaseOutputs>(
        &self,
        outputs: &mut O,
        rotor: RotorState,
        lead: Lead,
        scale: f32,
    ) -> DriveOutput {
        drive_state(outputs, effective_state(rotor, self.offset, lead), scale)
    }
}

/// Write a raw drive state to the outputs.
///
/// Every output that must be off is written before any output is switched
/// on, so the two switches of a phase are never commanded on together.
pub fn drive_state<O: PhaseOutputs>(outputs: &mut O, state: u8, scale: f32) -> DriveOutput {
    let mask = DRIVE_TABLE[(state & 0x07) as usize];

    for channel in PhaseChannel::ALL {
        if mask & channel.mask() == 0 {
            outputs.set_duty(channel, 0.0);
        }
    }
    for channel in PhaseChannel::ALL {
        if mask & channel.mask() != 0 {
            outputs.set_duty(channel, scale);
        }
    }

    DriveOutput::from_mask(mask, scale)
}
