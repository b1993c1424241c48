use std::{
    cell::Cell,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use spindle_error::{SpindleResult, StackError, WorkerError};
use tracing::{debug, error, info, warn};

use crate::queue::{log_handler_error, DispatchQueue};

/// Счётчик идентификаторов воркеров.
static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Идентификатор воркера, которому принадлежит текущий поток доставки.
    static CURRENT_WORKER: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Параметры потоков доставки.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Количество потоков доставки
    pub threads: usize,
    /// Сколько поток ждёт работы, прежде чем снова проверить флаг остановки
    pub idle_wait: Duration,
    /// Префикс имени потоков
    pub name: String,
}

/// Фоновый потребитель [`DispatchQueue`].
///
/// Состояния: остановлен (начальное) и запущен. Переходы только через
/// [`start`](Self::start) и [`stop`](Self::stop). После возврата из `stop`
/// ни один обработчик этого воркера не выполняется и новые записи не
/// извлекаются до следующего `start`.
pub struct DeliveryWorker {
    id: u64,
    config: WorkerConfig,
    queue: Arc<DispatchQueue>,
    /// Удерживается на всё время запуска и остановки, включая join потоков
    lifecycle: Mutex<Option<ActiveRun>>,
    stop_requested: Arc<AtomicBool>,
    running: AtomicBool,
    counters: Arc<WorkerCounters>,
}

struct ActiveRun {
    threads: Vec<JoinHandle<()>>,
    started_at: Instant,
}

#[derive(Debug, Default)]
struct WorkerCounters {
    invoked: AtomicU64,
    failed: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
}

/// Снимок счётчиков воркера.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub invoked: u64,
    pub failed: u64,
    pub starts: u64,
    pub stops: u64,
}

/// Всё, что нужно одному потоку доставки.
struct DeliveryLoop {
    worker_id: u64,
    queue: Arc<DispatchQueue>,
    stop: Arc<AtomicBool>,
    idle_wait: Duration,
    counters: Arc<WorkerCounters>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl DeliveryWorker {
    pub fn new(
        queue: Arc<DispatchQueue>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
            config,
            queue,
            lifecycle: Mutex::new(None),
            stop_requested: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            counters: Arc::new(WorkerCounters::default()),
        }
    }

    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Запускает потоки доставки.
    ///
    /// Повторный вызов на запущенном воркере ничего не делает. Вызов из
    /// обработчика этого же воркера тоже ничего не делает, пока воркер не
    /// остановлен. После остановки из собственного обработчика возвращает
    /// [`WorkerError::SelfRestart`]: перезапуск должен выполнить внешний поток.
    pub fn start(&self) -> SpindleResult<()> {
        if self.on_own_thread() {
            if self.stop_requested.load(Ordering::Acquire) {
                let err = StackError::new(WorkerError::SelfRestart {
                    worker: self.config.name.clone(),
                });
                warn!(worker = %self.config.name, error = %err, "Delivery worker restart rejected");
                return Err(err);
            }
            debug!(worker = %self.config.name, "start() from own delivery thread ignored");
            return Ok(());
        }

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.is_some() && !self.stop_requested.load(Ordering::Acquire) {
            return Ok(());
        }

        // Предыдущий запуск мог остановить сам себя из обработчика
        if let Some(previous) = lifecycle.take() {
            self.join_threads(previous);
        }

        self.stop_requested.store(false, Ordering::Release);

        let threads = self.config.threads.max(1);
        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            match self.spawn_thread(index) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.stop_requested.store(true, Ordering::Release);
                    self.queue.wake_all();
                    self.join_threads(ActiveRun {
                        threads: handles,
                        started_at: Instant::now(),
                    });
                    let err = StackError::new(WorkerError::SpawnFailed {
                        worker: self.config.name.clone(),
                        reason: e.to_string(),
                    });
                    error!(worker = %self.config.name, error = %err, "Delivery worker failed to start");
                    return Err(err);
                }
            }
        }

        *lifecycle = Some(ActiveRun {
            threads: handles,
            started_at: Instant::now(),
        });
        self.running.store(true, Ordering::Release);
        self.counters.starts.fetch_add(1, Ordering::Relaxed);

        info!(
            worker = %self.config.name,
            queue = %self.queue.name(),
            threads,
            "Delivery worker started"
        );
        Ok(())
    }

    /// Останавливает потоки доставки и ждёт их завершения.
    ///
    /// Выполняющийся обработчик не прерывается: `stop` ждёт его окончания.
    /// Вызов из обработчика этого же воркера только поднимает флаг
    /// остановки, не дожидаясь потоков.
    pub fn stop(&self) {
        if self.on_own_thread() {
            self.stop_requested.store(true, Ordering::Release);
            self.running.store(false, Ordering::Release);
            self.queue.wake_all();
            debug!(worker = %self.config.name, "Delivery worker stop requested from own thread");
            return;
        }

        let mut lifecycle = self.lifecycle.lock();
        let Some(run) = lifecycle.take() else {
            return;
        };

        self.stop_requested.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
        self.queue.wake_all();

        let uptime = run.started_at.elapsed();
        self.join_threads(run);
        drop(lifecycle);

        self.counters.stops.fetch_add(1, Ordering::Relaxed);
        info!(
            worker = %self.config.name,
            queue = %self.queue.name(),
            uptime_ms = uptime.as_millis() as u64,
            pending = self.queue.size_queue(),
            "Delivery worker stopped"
        );
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            invoked: self.counters.invoked.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            starts: self.counters.starts.load(Ordering::Relaxed),
            stops: self.counters.stops.load(Ordering::Relaxed),
        }
    }

    fn on_own_thread(&self) -> bool {
        CURRENT_WORKER.with(|current| current.get() == Some(self.id))
    }

    fn spawn_thread(
        &self,
        index: usize,
    ) -> std::io::Result<JoinHandle<()>> {
        let delivery = DeliveryLoop {
            worker_id: self.id,
            queue: Arc::clone(&self.queue),
            stop: Arc::clone(&self.stop_requested),
            idle_wait: self.config.idle_wait,
            counters: Arc::clone(&self.counters),
        };

        thread::Builder::new()
            .name(format!("{}-{index}", self.config.name))
            .spawn(move || delivery.run())
    }

    fn join_threads(
        &self,
        run: ActiveRun,
    ) {
        for handle in run.threads {
            if handle.join().is_err() {
                let err = StackError::new(WorkerError::JoinFailed {
                    worker: self.config.name.clone(),
                });
                error!(worker = %self.config.name, error = %err, "Delivery thread panicked");
            }
        }
    }
}

impl DeliveryLoop {
    fn run(self) {
        CURRENT_WORKER.with(|current| current.set(Some(self.worker_id)));
        debug!(queue = %self.queue.name(), "Delivery thread running");

        while !self.stop.load(Ordering::Acquire) {
            match self.queue.pop_and_invoke() {
                Ok(true) => {
                    self.counters.invoked.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => {
                    self.queue.wait_for_work(self.idle_wait, &self.stop);
                }
                Err(err) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    log_handler_error(self.queue.name(), &err);
                }
            }
        }

        CURRENT_WORKER.with(|current| current.set(None));
        debug!(queue = %self.queue.name(), "Delivery thread exiting");
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            idle_wait: Duration::from_millis(100),
            name: "spindle-delivery".to_string(),
        }
    }
}

impl Drop for DeliveryWorker {
    fn drop(&mut self) {
        if self.is_running() {
            warn!(worker = %self.config.name, "Delivery worker dropped while running");
        }
        self.stop();
    }
}

impl fmt::Debug for DeliveryWorker {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DeliveryWorker")
            .field("name", &self.config.name)
            .field("queue", &self.queue.name())
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
