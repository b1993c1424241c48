use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса ошибок Spindle.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки и настройки
/// - 2xxx: Данные
/// - 6xxx: IO
/// - 9xxx: Доставка и выполнение обработчиков
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    Success = 0,

    Unknown = 1000,
    Internal = 1003,
    InvalidArgs = 1004,
    InvalidConfig = 1006,

    NotFound = 2000,

    Io = 6000,
    Timeout = 6002,

    HandlerFailed = 9000,
    HandlerPanicked = 9001,
    WorkerSpawnFailed = 9002,
    WorkerJoinFailed = 9003,
    ControllerClosed = 9004,
    WorkerSelfRestart = 9005,
}

/// Уровень, с которым ошибку следует записать в лог.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Вариант по числовому коду, `None` для неизвестных значений.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Имеет ли смысл повторить операцию.
    ///
    /// Ошибка обработчика сюда не входит: элемент уже снят с очереди и
    /// повторной доставки не будет.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Io | Self::WorkerSpawnFailed)
    }

    /// Ошибка пользовательского обработчика, а не инфраструктуры.
    pub fn is_handler_error(&self) -> bool {
        matches!(self, Self::HandlerFailed | Self::HandlerPanicked)
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Internal | Self::WorkerJoinFailed)
    }

    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound => LogLevel::Debug,
            Self::ControllerClosed => LogLevel::Info,
            Self::HandlerFailed
            | Self::InvalidArgs
            | Self::Timeout
            | Self::WorkerSelfRestart => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
