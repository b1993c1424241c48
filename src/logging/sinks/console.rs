use std::io::{self, Stdout};

use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{config::LoggingConfig, formatter};

/// Консольный слой по конфигурации.
pub fn layer_with_config<S>(config: &LoggingConfig) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    // Явно указываем writer как fn() -> Stdout
    let writer: fn() -> Stdout = io::stdout;
    formatter::build_formatter_from_config(
        &config.console,
        config.format,
        config.console.with_ansi,
        writer,
    )
}

#[cfg(test)]
mod tests {
    use tracing::info;
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;
    use crate::logging::config::{ConsoleConfig, LogFormat};

    /// Тест проверят, что слой можно зарегистрировать и что логирование не
    /// приводит к панике при разных форматах и with_ansi.
    #[test]
    fn test_layer_with_config_various_flags() {
        for format in [LogFormat::Compact, LogFormat::Pretty, LogFormat::Json] {
            for with_ansi in [true, false] {
                let cfg = LoggingConfig {
                    format,
                    console: ConsoleConfig {
                        with_ansi,
                        ..Default::default()
                    },
                    ..Default::default()
                };

                let subscriber = Registry::default().with(layer_with_config::<Registry>(&cfg));
                tracing::subscriber::with_default(subscriber, || {
                    info!(format = %format, with_ansi, "console sink smoke test");
                });
            }
        }
    }
}
