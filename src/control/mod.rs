//! Управление доставкой: пауза, очистка очереди, возобновление.
//!
//! - `controller`: [`Controller`] и его цикл [`Controller::run`].
//! - `schedule`: плановые циклы очистки [`FlushSchedule`].
//! - `handle`: команды [`ControlCommand`] и [`ControllerHandle`] для их
//!   отправки.

pub mod controller;
pub mod handle;
pub mod schedule;

pub use controller::*;
pub use handle::*;
pub use schedule::*;
