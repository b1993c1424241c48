//! Ошибки Spindle: коды статуса, [`StackError`] с цепочкой контекстов и
//! типы ошибок очередей, воркеров и настроек.

pub mod ext;
pub mod stack;
pub mod status_code;
pub mod types;

pub use ext::*;
pub use stack::*;
pub use status_code::*;
pub use types::*;

pub type SpindleResult<T> = Result<T, StackError>;
