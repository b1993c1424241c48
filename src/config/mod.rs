//! Настройки процесса: узел, доставка, циклы очистки, логирование.

pub mod settings;

pub use settings::*;
