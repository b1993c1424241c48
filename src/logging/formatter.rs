use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::Layer as LayerTrait,
    registry::LookupSpan,
};

use crate::logging::config::{ConsoleConfig, LogFormat};

/// Собирает fmt-слой по формату и опциям вывода.
///
/// Возвращаем boxed trait-объект, чтобы стереть конкретный тип формата
/// (json/pretty/compact).
pub fn build_formatter_from_config<S, W>(
    options: &ConsoleConfig,
    format: LogFormat,
    with_ansi: bool,
    writer: W,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(writer)
                .with_ansi(with_ansi)
                .with_target(options.with_target)
                .with_thread_names(options.with_thread_ids)
                .with_thread_ids(options.with_thread_ids)
                .with_line_number(options.with_line_numbers);
            Box::new(layer)
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(writer)
                .with_ansi(with_ansi)
                .with_target(options.with_target)
                .with_thread_names(options.with_thread_ids)
                .with_thread_ids(options.with_thread_ids)
                .with_line_number(options.with_line_numbers);
            Box::new(layer)
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_writer(writer)
                .with_ansi(with_ansi)
                .with_target(options.with_target)
                .with_thread_names(options.with_thread_ids)
                .with_thread_ids(options.with_thread_ids)
                .with_line_number(options.with_line_numbers);
            Box::new(layer)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;

    #[derive(Clone)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for Buffer {
        type Writer = BufferGuard;

        fn make_writer(&'a self) -> Self::Writer {
            BufferGuard(self.0.clone())
        }
    }

    struct BufferGuard(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for BufferGuard {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn render(format: LogFormat) -> String {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let layer = build_formatter_from_config::<Registry, _>(
            &ConsoleConfig::default(),
            format,
            false,
            Buffer(buffer.clone()),
        );
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(queue = "cq_2", size = 3, "Drain finished");
        });
        let out = buffer.lock().unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    /// JSON-формат выдаёт строку, которую можно разобрать, со всеми полями
    /// события.
    #[test]
    fn test_json_format_has_fields() {
        let out = render(LogFormat::Json);
        let line = out.lines().next().unwrap();
        assert!(line.starts_with('{'));
        assert!(line.contains("\"queue\":\"cq_2\""));
        assert!(line.contains("\"size\":3"));
        assert!(line.contains("Drain finished"));
    }

    #[test]
    fn test_compact_and_pretty_formats() {
        for format in [LogFormat::Compact, LogFormat::Pretty] {
            let out = render(format);
            assert!(out.contains("Drain finished"), "{format}: {out}");
            assert!(out.contains("cq_2"), "{format}: {out}");
        }
    }
}
