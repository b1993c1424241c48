use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки загрузки и проверки настроек.
#[derive(Debug, Clone, Error)]
pub enum SettingsError {
    /// Источник настроек не удалось прочитать или разобрать
    #[error("failed to load settings: {0}")]
    Load(String),
    /// Значение поля недопустимо
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ErrorExt for SettingsError {
    fn status_code(&self) -> StatusCode {
        StatusCode::InvalidConfig
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
