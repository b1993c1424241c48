use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки доставки элемента очереди обработчику.
///
/// Элемент к этому моменту уже снят с очереди, поэтому ошибка никогда не
/// оставляет висящих записей: она только сообщается наружу.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Обработчик вернул ошибку
    #[error("handler of subscription {subscription} failed on item #{key}: {reason}")]
    HandlerFailed {
        subscription: u64,
        key: u64,
        reason: String,
    },
    /// Обработчик запаниковал
    #[error("handler of subscription {subscription} panicked on item #{key}: {message}")]
    HandlerPanicked {
        subscription: u64,
        key: u64,
        message: String,
    },
}

/// Ошибка, которую возвращает пользовательский обработчик сообщения.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

/// Результат вызова обработчика.
pub type HandlerResult = Result<(), HandlerError>;

impl DispatchError {
    pub fn subscription(&self) -> u64 {
        match self {
            Self::HandlerFailed { subscription, .. } | Self::HandlerPanicked { subscription, .. } => {
                *subscription
            }
        }
    }

    pub fn key(&self) -> u64 {
        match self {
            Self::HandlerFailed { key, .. } | Self::HandlerPanicked { key, .. } => *key,
        }
    }
}

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl ErrorExt for DispatchError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::HandlerFailed { .. } => StatusCode::HandlerFailed,
            Self::HandlerPanicked { .. } => StatusCode::HandlerPanicked,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
