use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use spindle_error::{GenericError, SpindleResult, StackError, StatusCode};
use tokio::{
    sync::mpsc,
    time::{sleep_until, Instant},
};
use tracing::{debug, error, info, warn};

use super::{ControlCommand, FlushSchedule, SchedulePhase, ScheduleState};
use crate::{
    delivery::DeliveryWorker,
    queue::{DispatchQueue, DrainReport},
};

/// Задержка перед повтором планового действия, завершившегося ошибкой.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Приостанавливает доставку, очищает очередь и возобновляет доставку.
///
/// Владеет воркером и его очередью явно. Блокирующие операции выполняются
/// синхронно; [`run`](Self::run) выносит их в пул блокирующих задач tokio.
pub struct Controller {
    queue: Arc<DispatchQueue>,
    worker: Arc<DeliveryWorker>,
    paused: AtomicBool,
    cycles: AtomicU64,
}

impl Controller {
    pub fn new(worker: Arc<DeliveryWorker>) -> Self {
        Self {
            queue: Arc::clone(worker.queue()),
            worker,
            paused: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }

    pub fn worker(&self) -> &Arc<DeliveryWorker> {
        &self.worker
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Количество выполненных очисток.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Останавливает доставку. Производители продолжают ставить элементы в
    /// очередь.
    pub fn pause(&self) {
        self.worker.stop();
        self.paused.store(true, Ordering::Release);
        info!(
            queue = %self.queue.name(),
            pending = self.queue.size_queue(),
            "Delivery paused"
        );
    }

    /// Возобновляет доставку. При `flush = true` сначала очищает очередь.
    ///
    /// Если доставка не была приостановлена, воркер останавливается перед
    /// очисткой, чтобы очистка не шла параллельно с вызовами.
    pub fn resume(
        &self,
        flush: bool,
    ) -> SpindleResult<Option<DrainReport>> {
        let report = if flush {
            self.worker.stop();
            Some(self.drain_pending())
        } else {
            None
        };

        self.worker.start()?;
        self.paused.store(false, Ordering::Release);
        info!(queue = %self.queue.name(), flushed = flush, "Delivery resumed");
        Ok(report)
    }

    /// Полный цикл: остановка, очистка, запуск.
    ///
    /// Вызванный из обработчика своего же воркера, очищает очередь, но не
    /// может запустить воркер снова: возвращает ошибку
    /// [`StatusCode::WorkerSelfRestart`](spindle_error::StatusCode::WorkerSelfRestart),
    /// и контроллер остаётся на паузе.
    pub fn flush_cycle(&self) -> SpindleResult<DrainReport> {
        self.worker.stop();
        self.paused.store(true, Ordering::Release);
        let report = self.drain_pending();
        self.worker.start()?;
        self.paused.store(false, Ordering::Release);
        Ok(report)
    }

    /// Цикл управления: плановые действия по `schedule` и команды из
    /// `commands`. Завершается по [`ControlCommand::Shutdown`] или при
    /// закрытии канала.
    pub async fn run(
        self: Arc<Self>,
        schedule: FlushSchedule,
        mut commands: mpsc::Receiver<ControlCommand>,
    ) {
        let mut state = ScheduleState::new(schedule, Instant::now());
        info!(
            queue = %self.queue.name(),
            initial_delay_ms = schedule.initial_delay.as_millis() as u64,
            pause_ms = schedule.pause.as_millis() as u64,
            interval_ms = schedule.interval.map(|i| i.as_millis() as u64),
            "Controller started"
        );

        loop {
            let deadline = state.deadline();
            tokio::select! {
                _ = wait_deadline(deadline) => {
                    self.run_phase(&mut state).await;
                }
                command = commands.recv() => match command {
                    Some(ControlCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
            }
        }

        info!(
            queue = %self.queue.name(),
            cycles = self.cycles_completed(),
            "Controller stopped"
        );
    }

    async fn run_phase(
        self: &Arc<Self>,
        state: &mut ScheduleState,
    ) {
        let Some(phase) = state.phase() else {
            return;
        };

        let result = match phase {
            SchedulePhase::Pause => self.blocking(|c| {
                c.pause();
                Ok(())
            })
            .await,
            SchedulePhase::Resume => self.blocking(|c| c.resume(true).map(|_| ())).await,
        };

        match result {
            Ok(()) => {
                state.advance(Instant::now());
                debug!(next = ?state.phase(), "Scheduled phase {phase:?} done");
            }
            Err(err) => {
                error!(
                    phase = ?phase,
                    code = %err.status_code(),
                    error = %err,
                    "Scheduled phase failed, retrying"
                );
                state.retry_after(Instant::now(), RETRY_DELAY);
            }
        }
    }

    async fn handle_command(
        self: &Arc<Self>,
        command: ControlCommand,
    ) {
        debug!(?command, "Controller command");
        match command {
            ControlCommand::Pause { ack } => {
                let result = self.blocking(|c| {
                    c.pause();
                    Ok(())
                })
                .await;
                if let Err(err) = result {
                    error!(error = %err, "Pause failed");
                }
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            ControlCommand::Resume { flush, ack } => {
                let result = self.blocking(move |c| c.resume(flush)).await;
                reply(ack, result, "Resume");
            }
            ControlCommand::Flush { ack } => {
                let result = self.blocking(|c| c.flush_cycle()).await;
                reply(ack, result, "Flush");
            }
            ControlCommand::Shutdown => {}
        }
    }

    /// Выполняет `op` в пуле блокирующих задач tokio.
    async fn blocking<T, F>(
        self: &Arc<Self>,
        op: F,
    ) -> SpindleResult<T>
    where
        F: FnOnce(&Controller) -> SpindleResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || op(&this))
            .await
            .map_err(|e| {
                StackError::new(GenericError::new(
                    StatusCode::Internal,
                    format!("controller task failed: {e}"),
                ))
            })?
    }

    fn drain_pending(&self) -> DrainReport {
        let before = self.queue.size_queue();
        let report = self.queue.drain();
        self.cycles.fetch_add(1, Ordering::Relaxed);
        info!(
            queue = %self.queue.name(),
            before,
            after = self.queue.size_queue(),
            discarded = report.items_discarded,
            "Queue flushed"
        );
        report
    }
}

fn reply<T>(
    ack: Option<tokio::sync::oneshot::Sender<SpindleResult<T>>>,
    result: SpindleResult<T>,
    action: &'static str,
) {
    if let Err(err) = &result {
        error!(action, error = %err, "Controller command failed");
    }
    if let Some(ack) = ack {
        if ack.send(result).is_err() {
            warn!(action, "Command sender went away before the reply");
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl fmt::Debug for Controller {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Controller")
            .field("queue", &self.queue.name())
            .field("paused", &self.is_paused())
            .field("cycles", &self.cycles_completed())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
