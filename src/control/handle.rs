use spindle_error::{SpindleResult, StackError, WorkerError};
use tokio::sync::{mpsc, oneshot};

use crate::queue::DrainReport;

/// Команды, которые принимает [`Controller::run`](super::Controller::run).
///
/// Поле `ack`, если задано, получает результат выполнения команды.
#[derive(Debug)]
pub enum ControlCommand {
    Pause {
        ack: Option<oneshot::Sender<()>>,
    },
    Resume {
        flush: bool,
        ack: Option<oneshot::Sender<SpindleResult<Option<DrainReport>>>>,
    },
    Flush {
        ack: Option<oneshot::Sender<SpindleResult<DrainReport>>>,
    },
    Shutdown,
}

/// Handle for sending commands to a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControlCommand>,
}

/// Создаёт канал команд контроллера.
pub fn command_channel(capacity: usize) -> (ControllerHandle, mpsc::Receiver<ControlCommand>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ControllerHandle { tx }, rx)
}

impl ControllerHandle {
    /// Останавливает доставку и ждёт подтверждения.
    pub async fn pause(&self) -> SpindleResult<()> {
        let (ack, rx) = oneshot::channel();
        self.send(ControlCommand::Pause { ack: Some(ack) }).await?;
        rx.await.map_err(|_| closed())
    }

    /// Возобновляет доставку, при `flush = true` предварительно очищая очередь.
    pub async fn resume(
        &self,
        flush: bool,
    ) -> SpindleResult<Option<DrainReport>> {
        let (ack, rx) = oneshot::channel();
        self.send(ControlCommand::Resume {
            flush,
            ack: Some(ack),
        })
        .await?;
        rx.await.map_err(|_| closed())?
    }

    /// Выполняет полный цикл: остановка, очистка, запуск.
    pub async fn flush(&self) -> SpindleResult<DrainReport> {
        let (ack, rx) = oneshot::channel();
        self.send(ControlCommand::Flush { ack: Some(ack) }).await?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn shutdown(&self) -> SpindleResult<()> {
        self.send(ControlCommand::Shutdown).await
    }

    /// Try to send without waiting (fails if the queue is full or closed).
    pub fn try_send(
        &self,
        command: ControlCommand,
    ) -> SpindleResult<()> {
        self.tx.try_send(command).map_err(|_| closed())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(
        &self,
        command: ControlCommand,
    ) -> SpindleResult<()> {
        self.tx.send(command).await.map_err(|_| closed())
    }
}

fn closed() -> StackError {
    StackError::new(WorkerError::ControllerClosed)
}
