use std::{fmt, panic::Location, sync::Arc};

use crate::{ErrorExt, LogLevel, StatusCode};

/// Ошибка с цепочкой контекстов.
///
/// Корневая ошибка и контексты лежат за `Arc`, клонирование дешёвое: одну и
/// ту же ошибку можно вернуть вызывающему и отправить в канал подтверждения.
#[derive(Clone)]
pub struct StackError {
    inner: Arc<dyn ErrorExt>,
    contexts: Vec<Frame>,
}

/// Один уровень контекста и место, где он был добавлен.
#[derive(Debug, Clone)]
pub struct Frame {
    pub message: String,
    pub location: &'static Location<'static>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StackError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            inner: Arc::new(err),
            contexts: Vec::new(),
        }
    }

    /// Добавляет внешний уровень контекста.
    #[track_caller]
    pub fn context(
        mut self,
        msg: impl Into<String>,
    ) -> Self {
        self.contexts.push(Frame {
            message: msg.into(),
            location: Location::caller(),
        });
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.inner.status_code()
    }

    pub fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }

    pub fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    /// Контексты от внутреннего к внешнему.
    pub fn contexts(&self) -> &[Frame] {
        &self.contexts
    }

    pub fn downcast_ref<T: ErrorExt>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StackError
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let frames: Vec<String> = self
            .contexts
            .iter()
            .map(|c| format!("{} ({}:{})", c.message, c.location.file(), c.location.line()))
            .collect();
        f.debug_struct("StackError")
            .field("code", &self.status_code())
            .field("error", &self.inner.to_string())
            .field("contexts", &frames)
            .finish()
    }
}

/// Внешний контекст первым: `delivery loop: dispatch queue `cq`: <ошибка>`.
impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for frame in self.contexts.iter().rev() {
            write!(f, "{}: ", frame.message)?;
        }
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DispatchError, WorkerError};

    #[test]
    fn test_context_chain() {
        let err = DispatchError::HandlerFailed {
            subscription: 2,
            key: 17,
            reason: "boom".to_string(),
        };
        let stack = StackError::new(err)
            .context("dispatch queue `cq_2`")
            .context("delivery loop");

        assert_eq!(stack.contexts().len(), 2);
        assert_eq!(stack.contexts()[0].message, "dispatch queue `cq_2`");
        assert!(stack.contexts()[0].location.file().ends_with("stack.rs"));
        assert_eq!(
            stack.to_string(),
            "delivery loop: dispatch queue `cq_2`: handler of subscription 2 failed on item #17: boom"
        );
    }

    #[test]
    fn test_downcast_and_kind() {
        let stack = StackError::from(WorkerError::SpawnFailed {
            worker: "cq".to_string(),
            reason: "no threads".to_string(),
        });

        assert!(stack.downcast_ref::<WorkerError>().is_some());
        assert!(stack.downcast_ref::<DispatchError>().is_none());
        assert_eq!(stack.kind(), "WorkerError");
        assert_eq!(stack.status_code(), StatusCode::WorkerSpawnFailed);
    }

    #[test]
    fn test_clone_keeps_contexts() {
        let stack = StackError::new(WorkerError::ControllerClosed).context("flush");
        let copy = stack.clone();
        assert_eq!(copy.to_string(), stack.to_string());
        assert_eq!(copy.log_level(), LogLevel::Info);
    }
}
