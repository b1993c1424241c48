use std::{collections::BTreeMap, env, fmt, fs, io, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use spindle_error::SettingsError;

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Формат вывода событий.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error
    pub level: String,
    /// Уровни для отдельных модулей, например `spindle::queue = "trace"`
    pub module_levels: BTreeMap<String, String>,
    pub format: LogFormat,
    /// Каталог файловых логов
    pub log_dir: PathBuf,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    /// Префикс имени файла; к нему добавляется дата ротации
    pub filename: String,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoggingConfig {
    /// Применяет переопределения из переменных окружения
    /// `SPINDLE_LOG_LEVEL`, `SPINDLE_LOG_FORMAT`, `SPINDLE_LOG_DIR`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("SPINDLE_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(format) = env::var("SPINDLE_LOG_FORMAT") {
            match format.parse() {
                Ok(format) => self.format = format,
                Err(e) => eprintln!("Ignoring SPINDLE_LOG_FORMAT: {e}"),
            }
        }
        if let Ok(dir) = env::var("SPINDLE_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        check_level("logging.level", &self.level)?;
        for level in self.module_levels.values() {
            check_level("logging.module_levels", level)?;
        }
        if self.file.enabled && self.file.filename.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "logging.file.filename",
                reason: "must not be empty when file logging is enabled".to_string(),
            });
        }
        Ok(())
    }

    /// Создаёт каталог логов, если включён файловый вывод.
    pub fn ensure_log_dir(&self) -> io::Result<()> {
        if self.file.enabled {
            fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Директива `EnvFilter`: базовый уровень и уровни модулей,
    /// например `"info,spindle::queue=trace"`.
    pub fn build_filter_directive(&self) -> String {
        let mut directive = self.level.to_lowercase();
        for (module, level) in &self.module_levels {
            directive.push_str(&format!(",{module}={}", level.to_lowercase()));
        }
        directive
    }
}

fn check_level(
    field: &'static str,
    level: &str,
) -> Result<(), SettingsError> {
    if LEVELS.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(SettingsError::Invalid {
            field,
            reason: format!("unknown level `{level}`, expected one of {LEVELS:?}"),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: BTreeMap::new(),
            format: LogFormat::Compact,
            log_dir: PathBuf::from("logs"),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filename: "spindle.log".to_string(),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
