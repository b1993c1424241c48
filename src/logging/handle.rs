use std::time::{Duration, Instant};

use tracing_appender::non_blocking::WorkerGuard;

/// Сколько может длиться сброс файлового writer-а без предупреждения.
const SLOW_SHUTDOWN: Duration = Duration::from_secs(5);

/// Handle жизненного цикла логирования.
///
/// Держит guard неблокирующего файлового writer-а. Записи, ещё не
/// сброшенные в файл, дописываются в [`shutdown`](Self::shutdown).
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    shut_down: bool,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            shut_down: false,
        }
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Сбрасывает файловый writer. Вызывается последним действием процесса.
    pub fn shutdown(mut self) {
        self.shut_down = true;
        tracing::info!(file_sink = self.has_file_sink(), "Logging shutdown");

        let started = Instant::now();
        drop(self.file_guard.take());

        let elapsed = started.elapsed();
        if elapsed > SLOW_SHUTDOWN {
            eprintln!("WARNING: flushing log files took {}ms", elapsed.as_millis());
        }
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if !self.shut_down && self.file_guard.is_some() {
            eprintln!(
                "WARNING: LoggingHandle dropped without shutdown(), \
                 the tail of the log file may be lost"
            );
        }
    }
}
