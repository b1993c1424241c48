use std::{any::Any, error::Error};

use crate::StatusCode;

/// Общий интерфейс ошибок Spindle (object-safe).
///
/// [`StackError`](crate::StackError) хранит корневую ошибку как
/// `dyn ErrorExt`, поэтому код статуса и downcast доступны без знания
/// конкретного типа.
pub trait ErrorExt: Error + Send + Sync + 'static {
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    fn as_any(&self) -> &dyn Any;

    /// Короткое имя типа ошибки для структурированных логов.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("Unknown")
    }
}
