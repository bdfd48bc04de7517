//! Six independent half-bridge outputs
//!
//! High sides on TIM1, low sides on TIM3. Both timers run at the same
//! carrier frequency; every switch gets its own duty so a phase can float.

use embassy_stm32::peripherals::{TIM1, TIM3};
use embassy_stm32::time::Hertz;
use embassy_stm32::timer::simple_pwm::SimplePwm;
use embassy_stm32::timer::Channel;
use sixstep_drive::{PhaseChannel, PhaseOutputs};

use crate::fmt::*;

pub struct PhasePwm {
    high: SimplePwm<'static, TIM1>,
    low: SimplePwm<'static, TIM3>,
}

impl PhasePwm {
    /// Take both timers, all outputs off and enabled
    pub fn new(high: SimplePwm<'static, TIM1>, low: SimplePwm<'static, TIM3>) -> Self {
        let mut pwm = Self { high, low };
        pwm.all_off();
        for channel in [Channel::Ch1, Channel::Ch2, Channel::Ch3] {
            pwm.high.channel(channel).enable();
            pwm.low.channel(channel).enable();
        }
        info!(
            "PhasePwm ready: max duty high={} low={}",
            pwm.high.max_duty_cycle(),
            pwm.low.max_duty_cycle()
        );
        pwm
    }

    pub fn all_off(&mut self) {
        for channel in PhaseChannel::ALL {
            self.set_duty(channel, 0.0);
        }
    }

    /// Change the carrier. Outputs are switched off first; the next
    /// commutation restores them with the new period.
    pub fn set_frequency(&mut self, frequency: Hertz) {
        self.all_off();
        self.high.set_frequency(frequency);
        self.low.set_frequency(frequency);
        debug!("PWM frequency: {} Hz", frequency.0);
    }
}

fn timer_channel(channel: PhaseChannel) -> Channel {
    match channel.phase() {
        0 => Channel::Ch1,
        1 => Channel::Ch2,
        _ => Channel::Ch3,
    }
}

/// Duty fraction to compare value
fn compare_value(duty: f32, max: u16) -> u16 {
    (duty.clamp(0.0, 1.0) * max as f32) as u16
}

impl PhaseOutputs for PhasePwm {
    fn set_duty(&mut self, channel: PhaseChannel, duty: f32) {
        let ch = timer_channel(channel);
        if channel.is_high() {
            let value = compare_value(duty, self.high.max_duty_cycle());
            self.high.channel(ch).set_duty_cycle(value);
        } else {
            let value = compare_value(duty, self.low.max_duty_cycle());
            self.low.channel(ch).set_duty_cycle(value);
        }
    }
}
