//! Очереди отложенных вызовов обработчиков.
//!
//! - `work_item`: один отложенный вызов обработчика для одного сообщения.
//! - `subscription`: FIFO-буфер элементов одной подписки и интерфейс
//!   [`CallbackSource`], через который с ним работает общая очередь.
//! - `dispatch`: общая очередь, собирающая записи всех подписок, с операциями
//!   `pop_and_invoke`, `remove_by_key` и `drain`.
//!
//! Порядок захвата блокировок един для всех путей: сначала guard
//! [`DispatchQueue`], затем блокировка буфера подписки.

pub mod dispatch;
pub mod subscription;
pub mod work_item;

pub use dispatch::*;
pub use subscription::*;
pub use work_item::*;
