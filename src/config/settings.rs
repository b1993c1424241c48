use std::{path::Path, time::Duration};

use config::{Config, Environment, File, Source};
use serde::{Deserialize, Serialize};
use spindle_error::SettingsError;

use crate::{control::FlushSchedule, delivery::WorkerConfig, logging::LoggingConfig};

/// Допустимые периоды главного цикла и издателя: от 1 мкс до суток.
const MIN_PERIOD: Duration = Duration::from_micros(1);
const MAX_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_LOOP_PERIOD: Duration = Duration::from_millis(100);

/// Настройки процесса.
///
/// Источники в порядке приоритета (последний побеждает):
/// значения по умолчанию, файл `spindle.toml`, переменные окружения
/// `SPINDLE__<СЕКЦИЯ>__<КЛЮЧ>`, например `SPINDLE__NODE__TOPIC=chatter`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub node: NodeSettings,
    pub delivery: DeliverySettings,
    pub flush: FlushSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub name: String,
    pub topic: String,
    /// Частота главного цикла, Гц
    pub loop_rate_hz: f64,
    /// Глубина буфера каждой подписки, `0` означает без ограничения
    pub buffer_depth: usize,
    /// Частота встроенного издателя, Гц; `0` отключает его
    pub talker_rate_hz: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Имя очереди, обслуживаемой воркером
    pub queue: String,
    pub threads: usize,
    pub idle_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushSettings {
    pub initial_delay_ms: u64,
    pub pause_ms: u64,
    /// Период повторных циклов; без значения цикл выполняется один раз
    pub interval_ms: Option<u64>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Settings {
    /// Загружает настройки из необязательного `spindle.toml` в рабочем
    /// каталоге и из окружения.
    pub fn load() -> Result<Self, SettingsError> {
        Self::build(File::with_name("spindle").required(false))
    }

    /// Загружает настройки из указанного файла (обязательного) и окружения.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Self::build(File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> Result<Self, SettingsError>
    where
        S: Source + Send + Sync + 'static,
    {
        let cfg = Config::builder()
            .add_source(file)
            // Переменные окружения вида SPINDLE__NODE__TOPIC
            .add_source(
                Environment::with_prefix("SPINDLE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SettingsError::Load(e.to_string()))?;

        cfg.try_deserialize()
            .map_err(|e| SettingsError::Load(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let node = &self.node;
        if node.topic.trim().is_empty() {
            return Err(invalid("node.topic", "must not be empty"));
        }
        if rate_period(node.loop_rate_hz).is_none() {
            return Err(invalid(
                "node.loop_rate_hz",
                "must give a period between 1us and 24h",
            ));
        }
        if node.talker_rate_hz != 0.0 && rate_period(node.talker_rate_hz).is_none() {
            return Err(invalid(
                "node.talker_rate_hz",
                "must be zero or give a period between 1us and 24h",
            ));
        }
        if self.delivery.queue.trim().is_empty() {
            return Err(invalid("delivery.queue", "must not be empty"));
        }
        if self.delivery.threads == 0 {
            return Err(invalid("delivery.threads", "must be at least 1"));
        }
        if self.delivery.idle_wait_ms == 0 {
            return Err(invalid("delivery.idle_wait_ms", "must be at least 1"));
        }
        if self.flush.interval_ms == Some(0) {
            return Err(invalid("flush.interval_ms", "must be positive when set"));
        }
        self.logging.validate()
    }

    /// Период главного цикла. Для частоты, не прошедшей
    /// [`validate`](Self::validate), возвращает 100 мс.
    pub fn loop_period(&self) -> Duration {
        rate_period(self.node.loop_rate_hz).unwrap_or(DEFAULT_LOOP_PERIOD)
    }

    /// Период встроенного издателя, `None` если он отключён или частота
    /// недопустима.
    pub fn talker_period(&self) -> Option<Duration> {
        rate_period(self.node.talker_rate_hz)
    }

    pub fn flush_schedule(&self) -> FlushSchedule {
        FlushSchedule {
            initial_delay: Duration::from_millis(self.flush.initial_delay_ms),
            pause: Duration::from_millis(self.flush.pause_ms),
            interval: self.flush.interval_ms.map(Duration::from_millis),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            threads: self.delivery.threads,
            idle_wait: Duration::from_millis(self.delivery.idle_wait_ms),
            name: format!("{}-delivery", self.delivery.queue),
        }
    }
}

/// Период для частоты `rate_hz` или `None`, если он вне
/// `[MIN_PERIOD, MAX_PERIOD]`.
fn rate_period(rate_hz: f64) -> Option<Duration> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rate_hz)
        .ok()
        .filter(|period| (MIN_PERIOD..=MAX_PERIOD).contains(period))
}

fn invalid(
    field: &'static str,
    reason: &str,
) -> SettingsError {
    SettingsError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: "listener".to_string(),
            topic: "chatter".to_string(),
            loop_rate_hz: 10.0,
            buffer_depth: 100,
            talker_rate_hz: 10.0,
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            queue: "cq_2".to_string(),
            threads: 1,
            idle_wait_ms: 100,
        }
    }
}

impl Default for FlushSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 10_000,
            pause_ms: 10_000,
            interval_ms: None,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
