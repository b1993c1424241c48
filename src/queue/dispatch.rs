use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use spindle_error::{HandlerResult, LogLevel, StackError};
use tracing::{debug, error, info, trace, warn};

use super::{CallbackSource, RemovalKey, WorkItem};

/// Общая очередь отложенных вызовов.
///
/// Собирает записи всех подписок, направленных в неё, в порядке поступления.
/// Каждая запись ссылается на элемент в буфере ровно одной подписки.
///
/// Guard очереди всегда захватывается раньше блокировки буфера подписки:
/// постановка, извлечение, удаление по ключу и `drain` следуют этому порядку.
pub struct DispatchQueue {
    name: Arc<str>,
    state: Mutex<DispatchState>,
    /// Сигнал для потоков доставки, ожидающих работу
    not_empty: Condvar,
    counters: DispatchCounters,
}

struct DispatchState {
    next_key: u64,
    /// Отсортированы по ключу: ключи выдаются монотонно и только дописываются
    entries: VecDeque<Entry>,
}

struct Entry {
    key: RemovalKey,
    source: Arc<dyn CallbackSource>,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    enqueued: AtomicU64,
    invoked: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
    evicted: AtomicU64,
    stale_skipped: AtomicU64,
    stale_removals: AtomicU64,
    drains: AtomicU64,
}

/// Снимок счётчиков очереди.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub invoked: u64,
    pub failed: u64,
    pub discarded: u64,
    pub evicted: u64,
    pub stale_skipped: u64,
    pub stale_removals: u64,
    pub drains: u64,
}

/// Итог одного вызова [`DispatchQueue::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Сколько раз захватывался guard очереди
    pub iterations: usize,
    /// Записи, удалённые самим `drain` (без учёта снятых конкурентно)
    pub entries_removed: usize,
    /// Элементы, выброшенные из буферов подписок без вызова
    pub items_discarded: usize,
    pub elapsed: Duration,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl DispatchQueue {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(DispatchState {
                next_key: 1,
                entries: VecDeque::new(),
            }),
            not_empty: Condvar::new(),
            counters: DispatchCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ставит вызов `call` в буфер подписки `source` и регистрирует запись.
    ///
    /// Ключ выдаётся под guard очереди. Если буфер подписки переполнен,
    /// самый старый элемент вытесняется вместе со своей записью.
    pub fn enqueue<F>(
        &self,
        source: Arc<dyn CallbackSource>,
        call: F,
    ) -> RemovalKey
    where
        F: FnOnce() -> HandlerResult + Send + 'static,
    {
        let mut state = self.state.lock();
        let key = state.allocate_key();
        let item = WorkItem::new(key, source.id(), Box::new(call));

        let evicted = source.enqueue(item);
        if let Some(old) = &evicted {
            state.remove_entry(old.key());
        }
        state.entries.push_back(Entry { key, source });
        drop(state);

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.not_empty.notify_one();

        if let Some(old) = evicted {
            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            debug!(
                queue = %self.name,
                subscription = old.subscription().0,
                key = old.key().0,
                "Subscription buffer full, oldest item evicted"
            );
            old.discard();
        }

        key
    }

    /// Снимает первую запись и вызывает её обработчик вне guard.
    ///
    /// # Возвращает
    /// - `Ok(true)`, если обработчик вызван и завершился успешно
    /// - `Ok(false)`, если работы нет
    /// - `Err(_)`, если обработчик вызван и завершился ошибкой или паникой;
    ///   запись к этому моменту уже удалена
    pub fn pop_and_invoke(&self) -> Result<bool, StackError> {
        let Some(item) = self.pop_ready() else {
            return Ok(false);
        };

        match item.invoke() {
            Ok(()) => {
                self.counters.invoked.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(StackError::new(err).context(format!("dispatch queue `{}`", self.name)))
            }
        }
    }

    /// Вызывает все записи, присутствующие в очереди на момент вызова.
    ///
    /// Записи, добавленные во время обхода, остаются до следующего вызова.
    /// Ошибки обработчиков логируются и не прерывают обход.
    pub fn call_available(&self) -> usize {
        let available = self.size_queue();
        let mut called = 0;

        for _ in 0..available {
            match self.pop_and_invoke() {
                Ok(true) => called += 1,
                Ok(false) => break,
                Err(err) => {
                    called += 1;
                    log_handler_error(&self.name, &err);
                }
            }
        }

        called
    }

    /// Удаляет запись с ключом `key` и выбрасывает соответствующий элемент.
    ///
    /// Отсутствие ключа означает ожидаемую гонку с `pop_and_invoke` или предыдущей
    /// итерацией `drain`: метод просто возвращает `false`.
    pub fn remove_by_key(
        &self,
        key: RemovalKey,
    ) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.remove_entry(key) else {
            drop(state);
            self.counters.stale_removals.fetch_add(1, Ordering::Relaxed);
            trace!(queue = %self.name, key = key.0, "Stale removal ignored");
            return false;
        };
        let item = entry.source.take(key);
        drop(state);

        if let Some(item) = item {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            item.discard();
        }
        true
    }

    /// Опустошает очередь, не вызывая ни одного обработчика.
    ///
    /// За один захват guard обрабатывается одна запись: буфер её подписки
    /// очищается под guard, затем guard освобождается и запись удаляется через
    /// [`remove_by_key`](Self::remove_by_key). Цикл повторяется, пока очередь
    /// не окажется пустой, поэтому элементы, добавленные во время обхода, тоже
    /// выбрасываются.
    pub fn drain(&self) -> DrainReport {
        let started = Instant::now();
        let mut report = DrainReport::default();

        debug!(queue = %self.name, size = self.size_queue(), "Drain started");

        while !self.is_empty() {
            let key = {
                let state = self.state.lock();
                // Очередь могла опустеть между проверкой и захватом guard
                let Some(front) = state.entries.front() else {
                    break;
                };
                report.items_discarded += front.source.clear();
                front.key
            };
            report.iterations += 1;

            if self.remove_by_key(key) {
                report.entries_removed += 1;
            }
            trace!(
                queue = %self.name,
                key = key.0,
                size = self.size_queue(),
                "Drain step"
            );
        }

        report.elapsed = started.elapsed();
        self.counters
            .discarded
            .fetch_add(report.items_discarded as u64, Ordering::Relaxed);
        self.counters.drains.fetch_add(1, Ordering::Relaxed);

        info!(
            queue = %self.name,
            iterations = report.iterations,
            entries_removed = report.entries_removed,
            items_discarded = report.items_discarded,
            elapsed_us = report.elapsed.as_micros() as u64,
            size = self.size_queue(),
            "Drain finished"
        );

        report
    }

    /// Текущее число записей. Значение может устареть сразу после возврата.
    pub fn size_queue(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Ключи записей в порядке очереди.
    pub fn keys(&self) -> Vec<RemovalKey> {
        self.state.lock().entries.iter().map(|e| e.key).collect()
    }

    /// Блокирует поток доставки, пока не появится работа, не будет поднят
    /// `stop` или не истечёт `timeout`.
    ///
    /// Флаг `stop` проверяется под guard, а [`wake_all`](Self::wake_all)
    /// берёт тот же guard, поэтому пробуждение не теряется.
    pub fn wait_for_work(
        &self,
        timeout: Duration,
        stop: &AtomicBool,
    ) -> bool {
        let mut state = self.state.lock();
        if !state.entries.is_empty() {
            return true;
        }
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let _ = self.not_empty.wait_for(&mut state, timeout);
        !state.entries.is_empty()
    }

    /// Будит все потоки, ожидающие в [`wait_for_work`](Self::wait_for_work).
    pub fn wake_all(&self) {
        let _state = self.state.lock();
        self.not_empty.notify_all();
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Снимает первую запись, у которой ещё есть элемент в буфере подписки.
    ///
    /// Записи без элемента (их буфер очистил `drain`) выбрасываются.
    fn pop_ready(&self) -> Option<WorkItem> {
        let mut state = self.state.lock();
        while let Some(entry) = state.entries.pop_front() {
            if let Some(item) = entry.source.take(entry.key) {
                return Some(item);
            }
            self.counters.stale_skipped.fetch_add(1, Ordering::Relaxed);
            trace!(queue = %self.name, key = entry.key.0, "Stale entry skipped");
        }
        None
    }
}

impl DispatchState {
    fn allocate_key(&mut self) -> RemovalKey {
        let key = RemovalKey(self.next_key);
        self.next_key += 1;
        key
    }

    fn remove_entry(
        &mut self,
        key: RemovalKey,
    ) -> Option<Entry> {
        let idx = self
            .entries
            .binary_search_by_key(&key, |entry| entry.key)
            .ok()?;
        self.entries.remove(idx)
    }
}

impl DispatchCounters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            invoked: self.invoked.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            stale_skipped: self.stale_skipped.load(Ordering::Relaxed),
            stale_removals: self.stale_removals.load(Ordering::Relaxed),
            drains: self.drains.load(Ordering::Relaxed),
        }
    }
}

/// Пишет ошибку обработчика в лог с уровнем, соответствующим её коду.
pub(crate) fn log_handler_error(
    queue: &str,
    err: &StackError,
) {
    let code = err.status_code();
    match err.log_level() {
        LogLevel::Error => error!(queue, %code, error = %err, "Handler failed"),
        LogLevel::Warn => warn!(queue, %code, error = %err, "Handler failed"),
        _ => debug!(queue, %code, error = %err, "Handler failed"),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for DispatchQueue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("name", &self.name)
            .field("size", &self.size_queue())
            .field("stats", &self.stats())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::AtomicUsize,
        thread,
    };

    use parking_lot::Mutex as PlMutex;
    use spindle_error::{DispatchError, HandlerError, StatusCode};

    use super::*;
    use crate::queue::{SubscriptionId, SubscriptionQueue};

    fn subscription(depth: usize) -> Arc<SubscriptionQueue> {
        Arc::new(SubscriptionQueue::new(SubscriptionId::next(), "chatter", depth))
    }

    /// Ставит в очередь обработчик, дописывающий `label` в общий журнал.
    fn push_label(
        queue: &DispatchQueue,
        sub: &Arc<SubscriptionQueue>,
        log: &Arc<PlMutex<Vec<&'static str>>>,
        label: &'static str,
    ) -> RemovalKey {
        let log = log.clone();
        queue.enqueue(sub.clone(), move || {
            log.lock().push(label);
            Ok(())
        })
    }

    #[test]
    fn test_keys_are_monotonic() {
        let queue = DispatchQueue::new("cq");
        let sub = subscription(0);
        let log = Arc::new(PlMutex::new(Vec::new()));

        let a = push_label(&queue, &sub, &log, "a");
        let b = push_label(&queue, &sub, &log, "b");
        let c = push_label(&queue, &sub, &log, "c");

        assert!(a < b && b < c);
        assert_eq!(queue.keys(), vec![a, b, c]);
        assert_eq!(sub.pending_keys(), vec![a, b, c]);
    }

    /// Пустая очередь: `pop_and_invoke` сообщает об отсутствии работы.
    #[test]
    fn test_pop_empty_returns_false() {
        let queue = DispatchQueue::new("cq");
        assert!(!queue.pop_and_invoke().unwrap());
        assert_eq!(queue.stats().invoked, 0);
    }

    /// A, B, C в одной подписке: после одного вызова остаются два элемента,
    /// после `drain` ни одного, и B, C так и не вызваны.
    #[test]
    fn test_pop_then_drain_scenario() {
        let queue = DispatchQueue::new("cq");
        let sub = subscription(100);
        let log = Arc::new(PlMutex::new(Vec::new()));
        for label in ["A", "B", "C"] {
            push_label(&queue, &sub, &log, label);
        }

        assert!(queue.pop_and_invoke().unwrap());
        assert_eq!(*log.lock(), vec!["A"]);
        assert_eq!(queue.size_queue(), 2);

        let report = queue.drain();
        assert_eq!(queue.size_queue(), 0);
        assert!(sub.is_empty());
        assert_eq!(report.items_discarded, 2);
        assert_eq!(*log.lock(), vec!["A"]);
    }

    /// Две подписки с порядком поступления A, C, B вызываются в том же
    /// порядке, а не сгруппированными по подписке.
    #[test]
    fn test_global_order_across_subscriptions() {
        let queue = DispatchQueue::new("cq");
        let q1 = subscription(100);
        let q2 = subscription(100);
        let log = Arc::new(PlMutex::new(Vec::new()));

        push_label(&queue, &q1, &log, "A");
        push_label(&queue, &q2, &log, "C");
        push_label(&queue, &q1, &log, "B");

        for _ in 0..3 {
            assert!(queue.pop_and_invoke().unwrap());
        }
        assert_eq!(*log.lock(), vec!["A", "C", "B"]);
        assert!(!queue.pop_and_invoke().unwrap());
    }

    /// Повторное удаление по ключу не ошибка, а no-op.
    #[test]
    fn test_remove_by_key_stale_is_noop() {
        let queue = DispatchQueue::new("cq");
        let sub = subscription(0);
        let log = Arc::new(PlMutex::new(Vec::new()));
        let a = push_label(&queue, &sub, &log, "A");
        let b = push_label(&queue, &sub, &log, "B");

        assert!(queue.remove_by_key(b));
        assert!(!queue.remove_by_key(b));
        assert!(!queue.remove_by_key(RemovalKey(9_999)));

        assert_eq!(queue.keys(), vec![a]);
        assert_eq!(sub.pending_keys(), vec![a]);
        assert_eq!(queue.stats().stale_removals, 2);

        assert!(queue.pop_and_invoke().unwrap());
        assert_eq!(*log.lock(), vec!["A"]);
    }

    /// Переполнение буфера подписки удаляет и запись вытесненного элемента.
    #[test]
    fn test_eviction_keeps_entries_paired() {
        let queue = DispatchQueue::new("cq");
        let sub = subscription(2);
        let log = Arc::new(PlMutex::new(Vec::new()));

        push_label(&queue, &sub, &log, "A");
        let b = push_label(&queue, &sub, &log, "B");
        let c = push_label(&queue, &sub, &log, "C");

        assert_eq!(queue.keys(), vec![b, c]);
        assert_eq!(sub.pending_keys(), vec![b, c]);
        assert_eq!(queue.stats().evicted, 1);

        queue.call_available();
        assert_eq!(*log.lock(), vec!["B", "C"]);
    }

    /// Записи, чей буфер уже очищен, пропускаются без вызова.
    #[test]
    fn test_stale_entries_are_skipped() {
        let queue = DispatchQueue::new("cq");
        let q1 = subscription(0);
        let q2 = subscription(0);
        let log = Arc::new(PlMutex::new(Vec::new()));

        push_label(&queue, &q1, &log, "A");
        push_label(&queue, &q1, &log, "B");
        push_label(&queue, &q2, &log, "C");

        assert_eq!(q1.clear(), 2);

        assert!(queue.pop_and_invoke().unwrap());
        assert_eq!(*log.lock(), vec!["C"]);
        assert_eq!(queue.stats().stale_skipped, 2);
        assert!(queue.is_empty());
    }

    /// Ошибка обработчика не оставляет запись в очереди и не мешает
    /// следующим вызовам.
    #[test]
    fn test_handler_failure_is_reported_and_removed() {
        let queue = DispatchQueue::new("cq");
        let sub = subscription(0);
        let log = Arc::new(PlMutex::new(Vec::new()));

        queue.enqueue(sub.clone(), || Err(HandlerError::new("bad message")));
        queue.enqueue(sub.clone(), || panic!("handler panic"));
        push_label(&queue, &sub, &log, "ok");

        let err = queue.pop_and_invoke().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::HandlerFailed);
        assert!(err.downcast_ref::<DispatchError>().is_some());
        assert_eq!(queue.size_queue(), 2);

        let err = queue.pop_and_invoke().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::HandlerPanicked);

        assert!(queue.pop_and_invoke().unwrap());
        assert_eq!(*log.lock(), vec!["ok"]);

        let stats = queue.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.invoked, 1);
        assert!(sub.is_empty());
    }

    /// `call_available` не трогает записи, добавленные во время обхода.
    #[test]
    fn test_call_available_uses_snapshot() {
        let queue = Arc::new(DispatchQueue::new("default"));
        let sub = subscription(0);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let queue_c = queue.clone();
            let sub_c = sub.clone();
            let calls_c = calls.clone();
            queue.enqueue(sub.clone(), move || {
                calls_c.fetch_add(1, Ordering::SeqCst);
                queue_c.enqueue(sub_c, || Ok(()));
                Ok(())
            });
        }

        assert_eq!(queue.call_available(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.size_queue(), 3);
    }

    #[test]
    fn test_drain_empty_queue() {
        let queue = DispatchQueue::new("cq");
        let report = queue.drain();
        assert_eq!(report.iterations, 0);
        assert_eq!(report.items_discarded, 0);
        assert_eq!(queue.stats().drains, 1);
    }

    /// `wait_for_work` возвращается сразу, если работа уже есть или поднят
    /// флаг остановки.
    #[test]
    fn test_wait_for_work() {
        let queue = Arc::new(DispatchQueue::new("cq"));
        let stop = AtomicBool::new(true);
        assert!(!queue.wait_for_work(Duration::from_secs(5), &stop));

        let stop = AtomicBool::new(false);
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.wait_for_work(Duration::from_secs(5), &stop))
        };
        thread::sleep(Duration::from_millis(20));
        queue.enqueue(subscription(0), || Ok(()));

        assert!(waiter.join().unwrap());
        assert!(queue.wait_for_work(Duration::from_secs(5), &AtomicBool::new(false)));
    }
}
