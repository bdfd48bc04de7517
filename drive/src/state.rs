//! Shared drive state
//!
//! One [`DriveState`] lives for the whole process. The sensor-edge context,
//! the control loop and the command terminal each hold a `&'static` to it.
//! Every field is behind a critical-section mutex so no context ever reads a
//! half-written value.

use core::cell::Cell;
use core::fmt;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::commutation::Lead;
use crate::controller::rotation_hold_velocity;
use crate::edge::{Direction, EdgeTiming, EdgeTracker};
use crate::params::{DriveConfig, DEFAULT_VELOCITY_CAP};
use crate::protocol::Command;
use crate::velocity;

/// Which setpoint the regulator follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlMode {
    VelocityHold,
    RotationHold,
}

/// Targets written by the command terminal
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Setpoints {
    pub mode: ControlMode,
    /// Authoritative in `VelocityHold`
    pub velocity_target: f32,
    /// Authoritative in `RotationHold` [revolutions]
    pub rotation_target: u32,
    /// Speed limit while holding a rotation target
    pub velocity_cap: f32,
}

impl Setpoints {
    pub const fn new() -> Self {
        Self {
            mode: ControlMode::VelocityHold,
            velocity_target: 0.0,
            rotation_target: 0,
            velocity_cap: DEFAULT_VELOCITY_CAP,
        }
    }
}

impl Default for Setpoints {
    fn default() -> Self {
        Self::new()
    }
}

/// Setpoint storage, single lock for all fields
pub struct SetpointStore {
    inner: Mutex<CriticalSectionRawMutex, Cell<Setpoints>>,
}

impl SetpointStore {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(Setpoints::new())),
        }
    }

    pub fn snapshot(&self) -> Setpoints {
        self.inner.lock(|s| s.get())
    }

    fn update(&self, f: impl FnOnce(&mut Setpoints)) {
        self.inner.lock(|s| {
            let mut setpoints = s.get();
            f(&mut setpoints);
            s.set(setpoints);
        });
    }

    pub fn set_velocity(&self, velocity: f32) {
        self.update(|s| {
            s.mode = ControlMode::VelocityHold;
            s.velocity_target = velocity;
        });
    }

    /// Hold a rotation count, limited to `cap` (magnitude)
    pub fn set_rotations(&self, rotations: u32, cap: f32) {
        self.update(|s| {
            s.mode = ControlMode::RotationHold;
            s.rotation_target = rotations;
            s.velocity_cap = libm::fabsf(cap);
        });
    }

    /// Rotation target with an explicit velocity, which also becomes the velocity target
    pub fn set_rotations_capped(&self, rotations: u32, max_velocity: f32) {
        let cap = libm::fabsf(max_velocity);
        self.update(|s| {
            s.mode = ControlMode::RotationHold;
            s.rotation_target = rotations;
            s.velocity_target = cap;
            s.velocity_cap = cap;
        });
    }
}

impl Default for SetpointStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Duty-cycle scale and lead, always published together
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlCommand {
    /// 0.0..=1.0
    pub scale: f32,
    pub lead: Lead,
}

impl ControlCommand {
    pub const STOPPED: Self = Self {
        scale: 0.0,
        lead: Lead::Forward,
    };

    /// Split a signed command into magnitude and lead. Magnitude saturates at 1.
    pub fn from_signed(command: f32) -> Self {
        if command.is_nan() {
            return Self::STOPPED;
        }
        Self {
            scale: libm::fabsf(command).min(1.0),
            lead: Lead::from_command(command),
        }
    }

    /// Signed command in -1.0..=1.0
    pub fn signed(&self) -> f32 {
        self.scale * self.lead.sign()
    }
}

/// Published control command
pub struct CommandCell {
    inner: Mutex<CriticalSectionRawMutex, Cell<ControlCommand>>,
}

impl CommandCell {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(ControlCommand::STOPPED)),
        }
    }

    pub fn publish(&self, command: ControlCommand) {
        self.inner.lock(|c| c.set(command));
    }

    pub fn load(&self) -> ControlCommand {
        self.inner.lock(|c| c.get())
    }
}

impl Default for CommandCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Report for the terminal status query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Status {
    pub setpoints: Setpoints,
    /// Velocity the regulator currently aims for
    pub target_velocity: f32,
    pub velocity: f32,
    pub direction: Direction,
    pub command: ControlCommand,
    /// Revolutions travelled since the last rotation command
    pub revolutions: f32,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "desired speed = {:.3}, speed = {:.3}, direction = {}",
            self.target_velocity,
            self.velocity,
            self.direction.as_i8()
        )?;
        if self.setpoints.mode == ControlMode::RotationHold {
            write!(
                f,
                ", rotations = {:.2}/{}",
                self.revolutions, self.setpoints.rotation_target
            )?;
        }
        Ok(())
    }
}

/// Everything the three execution contexts share
pub struct DriveState {
    pub edges: EdgeTracker,
    pub setpoints: SetpointStore,
    pub command: CommandCell,
}

impl DriveState {
    pub const fn new() -> Self {
        Self {
            edges: EdgeTracker::new(),
            setpoints: SetpointStore::new(),
            command: CommandCell::new(),
        }
    }

    /// Apply a setpoint command. Returns `false` for commands that carry no setpoint.
    ///
    /// A rotation command writes its setpoints and restarts position counting
    /// in one critical section.
    pub fn apply(&self, command: &Command, config: &DriveConfig) -> bool {
        match *command {
            Command::SetVelocity(velocity) => {
                self.setpoints.set_velocity(velocity);
            }
            Command::SetRotations(rotations) => self.setpoints.inner.lock(|_| {
                self.setpoints
                    .set_rotations(rotations, config.default_velocity_cap);
                self.edges.reset_position();
            }),
            Command::SetRotationsCapped {
                rotations,
                max_velocity,
            } => self.setpoints.inner.lock(|_| {
                self.setpoints.set_rotations_capped(rotations, max_velocity);
                self.edges.reset_position();
            }),
            Command::Tone(_) | Command::Status => return false,
        }
        true
    }

    /// Setpoints and edge timing read in one critical section
    pub fn control_snapshot(&self) -> (Setpoints, EdgeTiming) {
        self.setpoints
            .inner
            .lock(|s| (s.get(), self.edges.snapshot()))
    }

    pub fn status(&self, now_us: u64, config: &DriveConfig) -> Status {
        let (setpoints, timing) = self.control_snapshot();
        let target_velocity = match setpoints.mode {
            ControlMode::VelocityHold => setpoints.velocity_target,
            ControlMode::RotationHold => rotation_hold_velocity(&setpoints, &timing, config),
        };
        Status {
            setpoints,
            target_velocity,
            velocity: velocity::estimate(&timing, now_us, config.edge_timeout_us),
            direction: timing.direction,
            command: self.command.load(),
            revolutions: timing.position as f32 / config.edges_per_revolution as f32,
        }
    }
}

impl Default for DriveState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Sensor;
    use crate::protocol::Command;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_velocity_command() {
        let state = DriveState::new();
        let config = DriveConfig::default();
        assert!(state.apply(&Command::SetVelocity(55.0), &config));
        let s = state.setpoints.snapshot();
        assert_eq!(s.mode, ControlMode::VelocityHold);
        assert_eq!(s.velocity_target, 55.0);
    }

    #[test]
    fn test_rotation_command_resets_position() {
        let state = DriveState::new();
        let config = DriveConfig::default();
        state.edges.on_edge(crate::edge::Sensor::S1, 0);
        state.edges.on_edge(crate::edge::Sensor::S2, 10);
        assert_eq!(state.edges.snapshot().position, 2);

        assert!(state.apply(&Command::SetRotations(10), &config));
        let s = state.setpoints.snapshot();
        assert_eq!(s.mode, ControlMode::RotationHold);
        assert_eq!(s.rotation_target, 10);
        assert_eq!(s.velocity_cap, config.default_velocity_cap);
        assert_eq!(state.edges.snapshot().position, 0);
    }

    #[test]
    fn test_capped_rotation_command() {
        let state = DriveState::new();
        let config = DriveConfig::default();
        state.apply(
            &Command::SetRotationsCapped {
                rotations: 10,
                max_velocity: 3.5,
            },
            &config,
        );
        let s = state.setpoints.snapshot();
        assert_eq!(s.mode, ControlMode::RotationHold);
        assert_eq!(s.rotation_target, 10);
        assert_eq!(s.velocity_target, 3.5);
        assert_eq!(s.velocity_cap, 3.5);
    }

    #[test]
    fn test_non_setpoint_commands() {
        let state = DriveState::new();
        let config = DriveConfig::default();
        assert!(!state.apply(&Command::Status, &config));
        assert_eq!(state.setpoints.snapshot(), Setpoints::new());
    }

    #[test]
    fn test_command_from_signed() {
        assert_eq!(
            ControlCommand::from_signed(-0.4),
            ControlCommand {
                scale: 0.4,
                lead: Lead::Reverse
            }
        );
        assert_eq!(ControlCommand::from_signed(3.0).scale, 1.0);
        assert_eq!(ControlCommand::from_signed(-3.0).signed(), -1.0);
        assert_eq!(ControlCommand::from_signed(0.0).lead, Lead::Forward);
        assert_eq!(ControlCommand::from_signed(f32::NAN), ControlCommand::STOPPED);
    }

    #[test]
    fn test_status_text() {
        let state = DriveState::new();
        let config = DriveConfig::default();
        state.setpoints.set_velocity(12.5);
        let text = format!("{}", state.status(0, &config));
        assert_eq!(text, "desired speed = 12.500, speed = 0.000, direction = 1");

        state.apply(&Command::SetRotations(3), &config);
        let text = format!("{}", state.status(0, &config));
        assert!(text.ends_with(", rotations = 0.00/3"), "{}", text);
    }

    #[test]
    fn test_status_reports_rotation_hold_target() {
        let state = DriveState::new();
        let config = DriveConfig::default();
        state.apply(&Command::SetVelocity(50.0), &config);

        // 3 revolutions left at rotation_kp 4 is 12, under the default cap
        state.apply(&Command::SetRotations(3), &config);
        let status = state.status(0, &config);
        assert_eq!(status.target_velocity, 12.0);
        assert!(format!("{}", status).starts_with("desired speed = 12.000,"));

        state.apply(
            &Command::SetRotationsCapped {
                rotations: 3,
                max_velocity: 2.5,
            },
            &config,
        );
        assert_eq!(state.status(0, &config).target_velocity, 2.5);
    }

    #[test]
    fn test_rotation_command_and_position_reset_together() {
        // Each command n is followed by n % 4 forward edges, so a consistent
        // read never shows more travelled edges than its own target allows.
        let state = Arc::new(DriveState::new());
        let done = Arc::new(AtomicBool::new(false));
        let config = DriveConfig::default();

        let writer = {
            let state = state.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut now = 0u64;
                let mut k = 0usize;
                for n in 1..20_000u32 {
                    state.apply(&Command::SetRotations(n), &config);
                    for _ in 0..n % 4 {
                        state.edges.on_edge(Sensor::ALL[k % 3], now);
                        k += 1;
                        now += 10;
                    }
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        while !done.load(Ordering::SeqCst) {
            let (setpoints, timing) = state.control_snapshot();
            if setpoints.mode == ControlMode::RotationHold {
                let allowed = (setpoints.rotation_target % 4) as i32;
                assert!(
                    (0..=allowed).contains(&timing.position),
                    "target {} with position {}",
                    setpoints.rotation_target,
                    timing.position
                );
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_no_torn_command_pair() {
        // Writer alternates between two pairs; a reader must only ever see one of them
        let cell = Arc::new(CommandCell::new());
        let done = Arc::new(AtomicBool::new(false));
        let a = ControlCommand {
            scale: 0.25,
            lead: Lead::Forward,
        };
        let b = ControlCommand {
            scale: 0.75,
            lead: Lead::Reverse,
        };
        cell.publish(a);

        let writer = {
            let cell = cell.clone();
            let done = done.clone();
            thread::spawn(move || {
                for i in 0..200_000 {
                    cell.publish(if i % 2 == 0 { b } else { a });
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let mut reads = 0u32;
        while !done.load(Ordering::SeqCst) || reads < 1_000 {
            let seen = cell.load();
            assert!(seen == a || seen == b, "torn pair {:?}", seen);
            reads += 1;
        }
        writer.join().unwrap();
    }
}
