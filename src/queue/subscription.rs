use std::{
    collections::VecDeque,
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use spindle_error::{DispatchError, HandlerResult};

use super::{RemovalKey, SubscriptionId, WorkItem};

/// Источник отложенных вызовов, на который ссылаются записи
/// [`DispatchQueue`](super::DispatchQueue).
///
/// Общая очередь работает с буферами подписок только через этот интерфейс,
/// поэтому ей не нужно знать конкретный тип буфера.
///
/// Все методы вызываются под guard общей очереди и не должны обращаться к ней
/// обратно.
pub trait CallbackSource: Send + Sync {
    fn id(&self) -> SubscriptionId;

    fn topic(&self) -> &str;

    /// Добавляет элемент в конец буфера.
    ///
    /// Если буфер заполнен, вытесняет и возвращает самый старый элемент.
    fn enqueue(
        &self,
        item: WorkItem,
    ) -> Option<WorkItem>;

    /// Извлекает элемент с ключом `key`, если он ещё в буфере.
    fn take(
        &self,
        key: RemovalKey,
    ) -> Option<WorkItem>;

    /// Выбрасывает все элементы без вызова. Возвращает их количество.
    fn clear(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// FIFO-буфер отложенных вызовов одной подписки.
///
/// Элементы вызываются или очищаются строго в порядке поступления. Ключи
/// внутри буфера возрастают, что позволяет искать элемент бинарным поиском.
pub struct SubscriptionQueue {
    id: SubscriptionId,
    topic: Arc<str>,
    /// Глубина буфера, `0` означает отсутствие ограничения
    depth: usize,
    pending: Mutex<VecDeque<WorkItem>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SubscriptionQueue {
    pub fn new(
        id: SubscriptionId,
        topic: impl Into<Arc<str>>,
        depth: usize,
    ) -> Self {
        Self {
            id,
            topic: topic.into(),
            depth,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Снимает первый элемент и вызывает его обработчик.
    ///
    /// Возвращает `None`, если буфер пуст. Обработчик выполняется после
    /// освобождения блокировки буфера.
    pub fn invoke_front(&self) -> Option<Result<(), DispatchError>> {
        let item = self.pending.lock().pop_front()?;
        Some(item.invoke())
    }

    /// Ключи элементов, ожидающих вызова, в порядке поступления.
    pub fn pending_keys(&self) -> Vec<RemovalKey> {
        self.pending.lock().iter().map(WorkItem::key).collect()
    }
}

impl CallbackSource for SubscriptionQueue {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn enqueue(
        &self,
        item: WorkItem,
    ) -> Option<WorkItem> {
        let mut pending = self.pending.lock();
        let evicted = if self.depth > 0 && pending.len() >= self.depth {
            pending.pop_front()
        } else {
            None
        };
        pending.push_back(item);
        evicted
    }

    fn take(
        &self,
        key: RemovalKey,
    ) -> Option<WorkItem> {
        let mut pending = self.pending.lock();
        match pending.front() {
            Some(front) if front.key() == key => pending.pop_front(),
            Some(_) => {
                let idx = pending.binary_search_by_key(&key, WorkItem::key).ok()?;
                pending.remove(idx)
            }
            None => None,
        }
    }

    fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *self.pending.lock());
        let count = drained.len();
        drained.into_iter().for_each(WorkItem::discard);
        count
    }

    fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

impl fmt::Debug for SubscriptionQueue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SubscriptionQueue")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("depth", &self.depth)
            .field("pending", &self.len())
            .finish()
    }
}

/// Собирает [`WorkItem`] из замыкания.
pub fn work_item<F>(
    key: RemovalKey,
    subscription: SubscriptionId,
    call: F,
) -> WorkItem
where
    F: FnOnce() -> HandlerResult + Send + 'static,
{
    WorkItem::new(key, subscription, Box::new(call))
}
