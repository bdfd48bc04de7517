//! Closed-loop speed regulation
//!
//! [`ControlLoop::poll`] is called continuously by the control thread. It
//! commutates on every call and runs the PD regulator once more than
//! `control_period_ms` has elapsed since the previous tick.

use crate::commutation::{CommutationEngine, DriveOutput, PhaseOutputs};
use crate::edge::EdgeTiming;
use crate::fmt::*;
use crate::params::DriveConfig;
use crate::rotor::{self, SensorWiring};
use crate::state::{ControlCommand, ControlMode, DriveState, Setpoints};
use crate::velocity;

/// PD (Proportional-Derivative) regulator
pub struct PdController {
    /// Proportional gain
    kp: f32,
    /// Derivative gain
    kd: f32,
    /// Error of the previous update
    prev_error: f32,
}

impl PdController {
    pub fn new(kp: f32, kd: f32) -> Self {
        Self {
            kp,
            kd,
            prev_error: 0.0,
        }
    }

    /// Update the regulator
    ///
    /// # Arguments
    /// * `error` - Setpoint minus measurement
    /// * `elapsed_ms` - Time since the previous update [ms]
    ///
    /// # Returns
    /// Correction to add to the current command
    pub fn update(&mut self, error: f32, elapsed_ms: u32) -> f32 {
        let derivative = if elapsed_ms == 0 {
            0.0
        } else {
            (error - self.prev_error) * 1000.0 / elapsed_ms as f32
        };
        self.prev_error = error;

        self.kp * error + self.kd * derivative
    }

    /// Forget the previous error, so the next update has no derivative kick
    pub fn reset(&mut self) {
        self.prev_error = 0.0;
    }
}

/// Values of one regulator tick, for logging
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickReport {
    pub target: f32,
    pub measured: f32,
    pub error: f32,
    pub command: ControlCommand,
}

/// Velocity to aim for while holding a rotation target.
///
/// Proportional to the remaining revolutions, limited to the velocity cap.
pub fn rotation_hold_velocity(setpoints: &Setpoints, timing: &EdgeTiming, config: &DriveConfig) -> f32 {
    let travelled = timing.position as f32 / config.edges_per_revolution as f32;
    let remaining = setpoints.rotation_target as f32 - travelled;
    let cap = setpoints.velocity_cap;
    (config.rotation_kp * remaining).max(-cap).min(cap)
}

/// Speed regulator acting on the published control command
pub struct SpeedController {
    pd: PdController,
    config: DriveConfig,
    /// Mode seen at the previous tick
    mode: ControlMode,
}

impl SpeedController {
    pub fn new(config: DriveConfig) -> Self {
        Self {
            pd: PdController::new(config.kp, config.kd),
            config,
            mode: ControlMode::VelocityHold,
        }
    }

    pub fn target_velocity(&self, setpoints: &Setpoints, timing: &EdgeTiming) -> f32 {
        match setpoints.mode {
            ControlMode::VelocityHold => setpoints.velocity_target,
            ControlMode::RotationHold => rotation_hold_velocity(setpoints, timing, &self.config),
        }
    }

    /// One regulator step: read targets and velocity, publish the new (scale, lead) pair
    pub fn tick(&mut self, state: &DriveState, now_us: u64, elapsed_ms: u32) -> TickReport {
        let (setpoints, timing) = state.control_snapshot();
        if setpoints.mode != self.mode {
            debug!("Control mode {} -> {}", self.mode, setpoints.mode);
            self.pd.reset();
            self.mode = setpoints.mode;
        }

        let measured = velocity::estimate(&timing, now_us, self.config.edge_timeout_us);
        let target = self.target_velocity(&setpoints, &timing);
        let error = target - measured;
        let delta = self.pd.update(error, elapsed_ms);

        // only this controller writes the command, so read-modify-publish is safe
        let current = state.command.load();
        let command = ControlCommand::from_signed(current.signed() + delta);
        state.command.publish(command);

        trace!(
            "tick: target={} measured={} error={} scale={} lead={}",
            target,
            measured,
            error,
            command.scale,
            command.lead
        );

        TickReport {
            target,
            measured,
            error,
            command,
        }
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }
}

/// The control thread body: commutation at loop rate, regulation at tick rate
pub struct ControlLoop<'a> {
    state: &'a DriveState,
    controller: SpeedController,
    engine: CommutationEngine,
    wiring: SensorWiring,
    last_tick_us: u64,
    invalid_states: u32,
}

impl<'a> ControlLoop<'a> {
    pub fn new(state: &'a DriveState, config: DriveConfig, engine: CommutationEngine, now_us: u64) -> Self {
        Self {
            state,
            controller: SpeedController::new(config),
            engine,
            wiring: config.sensor_wiring,
            last_tick_us: now_us,
            invalid_states: 0,
        }
    }

    /// One loop iteration.
    ///
    /// # Arguments
    /// * `now_us` - Current time [µs]
    /// * `sensor_vector` - Raw sensor levels, bit i = sensor i
    /// * `outputs` - PWM outputs to commutate
    ///
    /// # Returns
    /// The tick report when the regulator ran during this call
    pub fn poll<O: PhaseOutputs>(
        &mut self,
        now_us: u64,
        sensor_vector: u8,
        outputs: &mut O,
    ) -> Option<TickReport> {
        let elapsed_ms = (now_us.saturating_sub(self.last_tick_us) / 1000).min(u32::MAX as u64) as u32;
        let report = if elapsed_ms > self.controller.config().control_period_ms {
            self.last_tick_us = now_us;
            Some(self.controller.tick(self.state, now_us, elapsed_ms))
        } else {
            None
        };

        self.commutate(sensor_vector, outputs);
        report
    }

    /// Drive the outputs for the current rotor position with the latest command
    pub fn commutate<O: PhaseOutputs>(&mut self, sensor_vector: u8, outputs: &mut O) -> DriveOutput {
        let rotor = rotor::decode(sensor_vector, self.wiring);
        if !rotor.is_valid() {
            self.invalid_states = self.invalid_states.wrapping_add(1);
        }
        let command = self.state.command.load();
        self.engine.apply(outputs, rotor, command.lead, command.scale)
    }

    /// Number of invalid sensor vectors seen while commutating
    pub fn invalid_states(&self) -> u32 {
        self.invalid_states
    }
}
