//! Внутрипроцессная подсистема Publish–Subscribe.
//!
//! Минимальная замена внешнего брокера сообщений, достаточная, чтобы
//! подписки получали сообщения через очереди отложенных вызовов:
//!
//! - `message`: строковое сообщение [`Message`].
//! - `node`: [`Node`] с регистрацией подписок, публикацией и `spin_once`.
//! - `subscriber`: [`Subscriber`], отписывающийся при `Drop`.
//!
//! Темы сопоставляются только по точному имени.

pub mod message;
pub mod node;
pub mod subscriber;

pub use message::*;
pub use node::{Handler, Node};
pub use subscriber::*;
