#![no_std]
#![no_main]

mod fmt;
mod hardware;
mod pwm;
mod tasks;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32::{
    exti::ExtiInput,
    gpio::{OutputType, Pull},
    interrupt,
    interrupt::{InterruptExt, Priority},
    time::Hertz,
    timer::{
        low_level::CountingMode,
        simple_pwm::{PwmPin, SimplePwm},
    },
    usart::BufferedUart,
};
use embassy_time::{Duration, Instant, Timer};
use sixstep_drive::{
    params::{self, HOMING_DWELL_MS, HOMING_SCALE},
    CommutationEngine, DriveConfig, DriveState, Homing, RotorState, Sensor,
};
use static_cell::StaticCell;

use fmt::*;
use hardware::Irqs;
use tasks::{motor_control_task, sensor_edge_task, terminal_task};

/// Shared by the edge, control and terminal contexts
static DRIVE: DriveState = DriveState::new();

/// Sensor edges run here, above the thread-mode tasks
static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();

static UART_TX_BUF: StaticCell<[u8; 128]> = StaticCell::new();
static UART_RX_BUF: StaticCell<[u8; 64]> = StaticCell::new();

#[interrupt]
unsafe fn UART4() {
    EXECUTOR_HIGH.on_interrupt()
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // ハードウェア初期化
    let p = embassy_stm32::init(hardware::create_clock_config());

    info!("═══════════════════════════════════════════");
    info!("   sixstep • sensored BLDC six-step drive");
    info!("   STM32G431RB @ 170MHz");
    info!("═══════════════════════════════════════════");

    let config = DriveConfig::new();
    let config = match config.validate() {
        Ok(()) => config,
        Err(e) => {
            error!("Invalid drive config ({}), using defaults", e);
            DriveConfig::default()
        }
    };
    info!(
        "Speed PD: Kp={}, Kd={}, period={}ms",
        config.kp, config.kd, config.control_period_ms
    );
    info!(
        "Edge timeout={}us, edges/rev={}, wiring={}",
        config.edge_timeout_us, config.edges_per_revolution, config.sensor_wiring
    );

    // PWM設定（TIM1 = high side, TIM3 = low side）
    let frequency = Hertz(params::pwm::DEFAULT_FREQUENCY_HZ);
    let high = SimplePwm::new(
        p.TIM1,
        Some(PwmPin::new(p.PA8, OutputType::PushPull)),
        Some(PwmPin::new(p.PA9, OutputType::PushPull)),
        Some(PwmPin::new(p.PA10, OutputType::PushPull)),
        None,
        frequency,
        CountingMode::EdgeAlignedUp,
    );
    let low = SimplePwm::new(
        p.TIM3,
        Some(PwmPin::new(p.PA6, OutputType::PushPull)),
        Some(PwmPin::new(p.PA4, OutputType::PushPull)),
        Some(PwmPin::new(p.PB0, OutputType::PushPull)),
        None,
        frequency,
        CountingMode::EdgeAlignedUp,
    );
    let mut pwm = pwm::PhasePwm::new(high, low);

    // センサー入力
    let sensors = [
        ExtiInput::new(p.PB4, p.EXTI4, Pull::Up),
        ExtiInput::new(p.PB5, p.EXTI5, Pull::Up),
        ExtiInput::new(p.PB10, p.EXTI10, Pull::Up),
    ];

    // ホーミング
    let mut homing = Homing::new(config.sensor_wiring, HOMING_SCALE, HOMING_DWELL_MS);
    homing.start(&mut pwm, Instant::now().as_micros());
    Timer::after(Duration::from_millis(HOMING_DWELL_MS)).await;
    let engine = loop {
        let vector = tasks::hall::sample_levels(&sensors);
        match homing.poll(Instant::now().as_micros(), vector, &mut pwm) {
            Some(Ok(engine)) => break engine,
            Some(Err(e)) => {
                warn!("Homing failed ({}), commutation offset 0", e);
                break CommutationEngine::new(RotorState::ORIGIN);
            }
            None => Timer::after(Duration::from_millis(1)).await,
        }
    };
    // homing may have nudged the rotor; start edge timing fresh
    DRIVE.edges.reset();

    interrupt::UART4.set_priority(Priority::P6);
    let high_spawner = EXECUTOR_HIGH.start(interrupt::UART4);
    for (input, sensor) in sensors.into_iter().zip(Sensor::ALL) {
        unwrap!(high_spawner.spawn(sensor_edge_task(input, sensor, &DRIVE)));
    }

    // シリアル端末
    let uart = unwrap!(BufferedUart::new(
        p.USART2,
        p.PA3,
        p.PA2,
        UART_TX_BUF.init([0; 128]),
        UART_RX_BUF.init([0; 64]),
        Irqs,
        hardware::terminal_config(),
    ));

    unwrap!(spawner.spawn(motor_control_task(pwm, &DRIVE, config, engine)));
    unwrap!(spawner.spawn(terminal_task(uart, &DRIVE, config)));
    info!("Drive running");

    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}
