use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{config::LoggingConfig, formatter};

/// Файловый слой с ежедневной ротацией и неблокирующей записью.
///
/// Возвращённый [`WorkerGuard`] должен жить до завершения процесса: при его
/// уничтожении сбрасываются буферизованные записи.
pub fn layer_with_config<S>(config: &LoggingConfig) -> (Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let appender = rolling::daily(&config.log_dir, &config.file.filename);
    let (writer, guard) = non_blocking(appender);

    let layer = formatter::build_formatter_from_config(&config.console, config.format, false, writer);
    (layer, guard)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;
    use crate::logging::config::FileConfig;

    /// События попадают в файл в каталоге логов после сброса guard.
    #[test]
    fn test_file_layer_writes_to_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = LoggingConfig {
            log_dir: tmp.path().to_path_buf(),
            file: FileConfig {
                enabled: true,
                filename: "sink-test.log".to_string(),
            },
            ..Default::default()
        };

        let (layer, guard) = layer_with_config::<Registry>(&cfg);
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(queue = "cq_2", "written to file");
        });
        drop(guard);

        let contents: String = fs::read_dir(tmp.path())
            .unwrap()
            .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect();
        assert!(contents.contains("written to file"));
        assert!(!contents.contains("\u{1b}["));
    }
}
