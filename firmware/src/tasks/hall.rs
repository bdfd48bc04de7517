//! センサーエッジタスク
//!
//! One task per sensor input, all on the high-priority interrupt executor.
//! Rising edges are timestamped into the shared [`EdgeTracker`]; both edges
//! update the level vector the control loop commutates from.
//!
//! [`EdgeTracker`]: sixstep_drive::EdgeTracker

use core::sync::atomic::{AtomicU8, Ordering};

use embassy_stm32::exti::ExtiInput;
use embassy_time::Instant;
use sixstep_drive::{DriveState, Sensor};

use crate::fmt::*;

/// Current sensor levels, bit i = sensor i
pub static SENSOR_LEVELS: AtomicU8 = AtomicU8::new(0);

/// Latest sensor vector
#[inline(always)]
pub fn sensor_vector() -> u8 {
    SENSOR_LEVELS.load(Ordering::Acquire) & 0x07
}

/// Sample all three inputs, before the edge tasks take over
pub fn sample_levels(inputs: &[ExtiInput<'static>; 3]) -> u8 {
    let mut vector = 0;
    for (sensor, input) in Sensor::ALL.iter().zip(inputs) {
        if input.is_high() {
            vector |= 1 << sensor.index();
        }
    }
    SENSOR_LEVELS.store(vector, Ordering::Release);
    vector
}

fn set_level(sensor: Sensor, high: bool) {
    let bit = 1 << sensor.index();
    if high {
        SENSOR_LEVELS.fetch_or(bit, Ordering::AcqRel);
    } else {
        SENSOR_LEVELS.fetch_and(!bit, Ordering::AcqRel);
    }
}

/// Sensor edge task
#[embassy_executor::task(pool_size = 3)]
pub async fn sensor_edge_task(
    mut input: ExtiInput<'static>,
    sensor: Sensor,
    state: &'static DriveState,
) {
    info!("Sensor edge task started: {}", sensor);

    loop {
        input.wait_for_any_edge().await;
        let now_us = Instant::now().as_micros();
        let high = input.is_high();
        set_level(sensor, high);
        if high {
            state.edges.on_edge(sensor, now_us);
        }
    }
}
