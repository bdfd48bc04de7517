//! ハードウェア初期化モジュール
//!
//! Clock tree, interrupt bindings and the board pin map.
//!
//! | Function            | Pin  | Peripheral          |
//! |---------------------|------|---------------------|
//! | L1 / L2 / L3 high   | PA8 / PA9 / PA10 | TIM1 CH1..3 |
//! | L1 / L2 / L3 low    | PA6 / PA4 / PB0  | TIM3 CH1..3 |
//! | Sensor 1 / 2 / 3    | PB4 / PB5 / PB10 | EXTI4 / 5 / 10 |
//! | Terminal TX / RX    | PA2 / PA3        | USART2 (ST-LINK VCP) |

use embassy_stm32::{bind_interrupts, peripherals, usart, Config};

use crate::fmt::*;

bind_interrupts!(pub struct Irqs {
    USART2 => usart::BufferedInterruptHandler<peripherals::USART2>;
});

/// Terminal baud rate
pub const TERMINAL_BAUD: u32 = 115_200;

/// RCCクロック設定を初期化
///
/// HSI → PLL（÷4 × 85 ÷ 2）で170MHz生成
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL85,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R;
        // 150MHz超はRange1 boostが必要
        config.rcc.boost = true;
    }
    config
}

/// Terminal UART settings, 8N1
pub fn terminal_config() -> usart::Config {
    let mut config = usart::Config::default();
    config.baudrate = TERMINAL_BAUD;
    debug!("Terminal UART: {} baud", TERMINAL_BAUD);
    config
}
