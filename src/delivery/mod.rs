//! Фоновая доставка отложенных вызовов.
//!
//! [`DeliveryWorker`] владеет потоками ОС, которые извлекают записи из
//! [`DispatchQueue`](crate::queue::DispatchQueue) и вызывают обработчики.

pub mod worker;

pub use worker::*;
