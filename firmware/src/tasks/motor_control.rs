//! モーター制御タスク
//!
//! Commutates as fast as the executor allows and runs the speed regulator
//! every control period (see [`ControlLoop`]).

use embassy_futures::yield_now;
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant};
use sixstep_drive::{CommutationEngine, ControlLoop, DriveConfig, DriveState};

use super::hall::sensor_vector;
use crate::fmt::*;
use crate::pwm::PhasePwm;

/// New PWM carrier frequency [Hz], from the terminal
pub static PWM_FREQUENCY: Signal<CriticalSectionRawMutex, u32> = Signal::new();

const LOG_INTERVAL: Duration = Duration::from_secs(1);

/// モーター制御タスク
#[embassy_executor::task]
pub async fn motor_control_task(
    mut pwm: PhasePwm,
    state: &'static DriveState,
    config: DriveConfig,
    engine: CommutationEngine,
) {
    info!(
        "Motor control task started: offset={} period={}ms",
        engine.offset().as_u8(),
        config.control_period_ms
    );

    let mut control = ControlLoop::new(state, config, engine, Instant::now().as_micros());
    let mut last_log = Instant::now();
    let mut logged_invalid = 0u32;

    loop {
        if let Some(hz) = PWM_FREQUENCY.try_take() {
            pwm.set_frequency(Hertz(hz));
            info!("Tone: PWM carrier {} Hz", hz);
        }

        let now = Instant::now();
        if let Some(report) = control.poll(now.as_micros(), sensor_vector(), &mut pwm) {
            if now.duration_since(last_log) >= LOG_INTERVAL {
                debug!(
                    "target={} measured={} scale={} lead={}",
                    report.target,
                    report.measured,
                    report.command.scale,
                    report.command.lead
                );

                let invalid = control.invalid_states();
                if invalid != logged_invalid {
                    warn!(
                        "Invalid rotor states: {} since last report",
                        invalid.wrapping_sub(logged_invalid)
                    );
                    logged_invalid = invalid;
                }
                last_log = now;
            }
        }

        yield_now().await;
    }
}
