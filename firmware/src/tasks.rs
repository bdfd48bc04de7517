//! タスクモジュール

pub mod hall;
pub mod motor_control;
pub mod terminal;

pub use hall::sensor_edge_task;
pub use motor_control::motor_control_task;
pub use terminal::terminal_task;
