use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки управления потоками доставки и контроллером.
#[derive(Debug, Clone)]
pub enum WorkerError {
    /// Не удалось запустить поток доставки
    SpawnFailed { worker: String, reason: String },
    /// Поток доставки завершился паникой вне обработчика
    JoinFailed { worker: String },
    /// `start()` из обработчика воркера, который сам себя остановил:
    /// поток обработчика не может дождаться собственного завершения
    SelfRestart { worker: String },
    /// Контроллер уже остановлен, команда не принята
    ControllerClosed,
}

impl std::fmt::Display for WorkerError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::SpawnFailed { worker, reason } => {
                write!(f, "Failed to spawn delivery thread for {worker}: {reason}")
            }
            Self::JoinFailed { worker } => {
                write!(f, "Delivery thread of {worker} terminated abnormally")
            }
            Self::SelfRestart { worker } => {
                write!(
                    f,
                    "Cannot restart {worker} from its own delivery thread while it is stopping"
                )
            }
            Self::ControllerClosed => write!(f, "Controller is not running"),
        }
    }
}

impl std::error::Error for WorkerError {}

impl ErrorExt for WorkerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::SpawnFailed { .. } => StatusCode::WorkerSpawnFailed,
            Self::JoinFailed { .. } => StatusCode::WorkerJoinFailed,
            Self::SelfRestart { .. } => StatusCode::WorkerSelfRestart,
            Self::ControllerClosed => StatusCode::ControllerClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
