use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use spindle_error::HandlerResult;
use tracing::{debug, trace};

use super::{Message, Subscriber};
use crate::queue::{CallbackSource, DispatchQueue, SubscriptionId, SubscriptionQueue};

/// Обработчик сообщений подписки.
pub type Handler = Arc<dyn Fn(&Message) -> HandlerResult + Send + Sync + 'static>;

pub(crate) type TopicKey = Arc<str>;
pub(crate) type TopicMap = DashMap<TopicKey, Vec<Arc<Route>>>;

/// Внутрипроцессный узел публикации и подписки.
///
/// Поддерживает:
/// - Подписки на тему по точному имени
/// - Общую очередь по умолчанию, обслуживаемую через [`Node::spin_once`]
/// - Подписки, направленные в отдельные [`DispatchQueue`]
/// - Автоматическое удаление тем без подписчиков
pub struct Node {
    name: Arc<str>,
    /// Тема → маршруты подписок
    topics: Arc<TopicMap>,
    default_queue: Arc<DispatchQueue>,
    /// Общее количество вызовов `publish`
    published: AtomicU64,
    /// Количество публикаций в тему без подписчиков
    unrouted: AtomicU64,
}

/// Маршрут доставки: буфер подписки, её очередь и обработчик.
pub(crate) struct Route {
    source: Arc<SubscriptionQueue>,
    queue: Arc<DispatchQueue>,
    handler: Handler,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Node {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        let name = name.into();
        let default_queue = Arc::new(DispatchQueue::new(format!("{name}/default")));
        Self {
            name,
            topics: Arc::new(DashMap::new()),
            default_queue,
            published: AtomicU64::new(0),
            unrouted: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Очередь, в которую попадают подписки без явно заданной очереди.
    pub fn default_queue(&self) -> &Arc<DispatchQueue> {
        &self.default_queue
    }

    /// Подписывается на тему `topic` с буфером глубины `depth`.
    ///
    /// Вызовы обработчика ставятся в `queue` или, если она не задана, в
    /// очередь узла по умолчанию. Отписка происходит при `Drop`
    /// возвращённого [`Subscriber`].
    pub fn subscribe<F>(
        &self,
        topic: &str,
        depth: usize,
        handler: F,
        queue: Option<Arc<DispatchQueue>>,
    ) -> Subscriber
    where
        F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
    {
        let key: TopicKey = Arc::from(topic);
        let queue = queue.unwrap_or_else(|| Arc::clone(&self.default_queue));
        let source = Arc::new(SubscriptionQueue::new(SubscriptionId::next(), key.clone(), depth));
        let route = Arc::new(Route {
            source: Arc::clone(&source),
            queue: Arc::clone(&queue),
            handler: Arc::new(handler),
        });

        self.topics.entry(key.clone()).or_default().push(route);

        debug!(
            node = %self.name,
            topic,
            subscription = source.id().0,
            depth,
            queue = %queue.name(),
            "Subscribed"
        );

        Subscriber::new(source, queue, Arc::downgrade(&self.topics))
    }

    /// Публикует сообщение в тему.
    ///
    /// Каждая подписка темы получает свой элемент в своей очереди.
    /// Возвращает количество подписок, получивших сообщение.
    pub fn publish(
        &self,
        topic: &str,
        msg: impl Into<Message>,
    ) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        let msg = msg.into();

        // Маршруты копируются, чтобы не держать шард DashMap во время enqueue
        let routes = match self.topics.get(topic) {
            Some(entry) => entry.value().clone(),
            None => {
                self.unrouted.fetch_add(1, Ordering::Relaxed);
                trace!(node = %self.name, topic, "No subscribers");
                return 0;
            }
        };

        for route in &routes {
            route.deliver(msg.clone());
        }
        routes.len()
    }

    /// Вызывает все обработчики, ожидающие в очереди по умолчанию.
    pub fn spin_once(&self) -> usize {
        self.default_queue.call_available()
    }

    /// Количество подписок на тему.
    pub fn subscriber_count(
        &self,
        topic: &str,
    ) -> usize {
        self.topics.get(topic).map_or(0, |routes| routes.len())
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn unrouted(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }
}

impl Route {
    pub(crate) fn id(&self) -> SubscriptionId {
        self.source.id()
    }

    fn deliver(
        &self,
        msg: Message,
    ) {
        let handler = Arc::clone(&self.handler);
        self.queue
            .enqueue(self.source.clone(), move || handler(&msg));
    }
}

impl fmt::Debug for Node {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("topics", &self.topics.len())
            .field("default_queue", &self.default_queue.name())
            .field("published", &self.published())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
