//! シリアル端末タスク
//!
//! Reads command lines from the UART, echoes them, and applies them to the
//! shared setpoints. Status and error replies are written back as text.

use core::fmt::Write as _;

use embassy_stm32::usart::{BufferedUart, BufferedUartTx};
use embassy_time::Instant;
use embedded_io_async::{Read, Write};
use heapless::String;
use sixstep_drive::{Command, DriveConfig, DriveState, LineBuffer, ParseError};

use super::motor_control::PWM_FREQUENCY;
use crate::fmt::*;

type Reply = String<128>;

async fn send(tx: &mut BufferedUartTx<'static>, text: &str) {
    write_bytes(tx, text.as_bytes()).await;
}

async fn write_bytes(tx: &mut BufferedUartTx<'static>, bytes: &[u8]) {
    if let Err(e) = tx.write_all(bytes).await {
        warn!("Terminal write failed: {}", e);
    }
}

fn reply_error(e: ParseError) -> Reply {
    let mut reply = Reply::new();
    // 128 bytes fit every ParseError message
    let _ = write!(reply, "error: {}\r\n", e);
    reply
}

/// Handle one complete line
async fn handle_line(
    tx: &mut BufferedUartTx<'static>,
    line: &str,
    state: &'static DriveState,
    config: &DriveConfig,
) {
    let command = match Command::parse(line) {
        Ok(command) => command,
        Err(e) => {
            warn!("Rejected command: {}", e);
            send(tx, &reply_error(e)).await;
            return;
        }
    };

    match command {
        Command::Status => {
            let status = state.status(Instant::now().as_micros(), config);
            let mut reply = Reply::new();
            if write!(reply, "{}\r\n", status).is_err() {
                warn!("Status text truncated");
            }
            send(tx, &reply).await;
        }
        Command::Tone(note) => {
            PWM_FREQUENCY.signal(note.frequency_hz());
            send(tx, "ok\r\n").await;
        }
        _ => {
            state.apply(&command, config);
            info!("Command: {}", command);
            send(tx, "ok\r\n").await;
        }
    }
}

/// シリアル端末タスク
#[embassy_executor::task]
pub async fn terminal_task(uart: BufferedUart<'static>, state: &'static DriveState, config: DriveConfig) {
    let (mut tx, mut rx) = uart.split();
    let mut line = LineBuffer::new();
    let mut buf = [0u8; 16];

    info!("Terminal task started");
    send(&mut tx, "sixstep ready\r\n").await;

    loop {
        let n = match rx.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Terminal read error: {}", e);
                line.clear();
                continue;
            }
        };

        // echo
        write_bytes(&mut tx, &buf[..n]).await;

        for &byte in &buf[..n] {
            match line.push(byte) {
                None => {}
                Some(Ok(text)) => handle_line(&mut tx, &text, state, &config).await,
                Some(Err(e)) => {
                    warn!("Rejected command: {}", e);
                    send(&mut tx, &reply_error(e)).await;
                }
            }
        }
    }
}
