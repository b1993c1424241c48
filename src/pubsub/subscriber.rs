use std::{
    fmt,
    sync::{Arc, Weak},
};

use tracing::debug;

use super::node::TopicMap;
use crate::queue::{CallbackSource, DispatchQueue, SubscriptionId, SubscriptionQueue};

/// Подписка на тему по точному имени.
///
/// Отписка происходит автоматически при `Drop`. Элементы, уже поставленные
/// в очередь, остаются в ней до вызова или очистки.
pub struct Subscriber {
    source: Arc<SubscriptionQueue>,
    queue: Arc<DispatchQueue>,
    topics: Weak<TopicMap>,
}

impl Subscriber {
    pub(crate) fn new(
        source: Arc<SubscriptionQueue>,
        queue: Arc<DispatchQueue>,
        topics: Weak<TopicMap>,
    ) -> Self {
        Self {
            source,
            queue,
            topics,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.source.id()
    }

    pub fn topic(&self) -> &str {
        self.source.topic()
    }

    /// Очередь, в которую ставятся вызовы обработчика.
    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }

    /// Количество элементов в буфере подписки.
    pub fn pending(&self) -> usize {
        self.source.len()
    }

    /// Явно отписаться от темы. Аналогично `drop(self)`.
    pub fn unsubscribe(self) {}

    fn detach(&self) {
        let Some(topics) = self.topics.upgrade() else {
            return;
        };
        let id = self.id();
        let topic = self.topic();

        let now_empty = match topics.get_mut(topic) {
            Some(mut routes) => {
                routes.retain(|route| route.id() != id);
                routes.is_empty()
            }
            None => false,
        };
        if now_empty {
            topics.remove_if(topic, |_, routes| routes.is_empty());
        }

        debug!(topic, subscription = id.0, "Unsubscribed");
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id())
            .field("topic", &self.topic())
            .field("queue", &self.queue.name())
            .field("pending", &self.pending())
            .finish()
    }
}
