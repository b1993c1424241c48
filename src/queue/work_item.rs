use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicU64, Ordering},
};

use spindle_error::{DispatchError, HandlerResult};

/// Счётчик идентификаторов подписок, выдаваемых через [`SubscriptionId::next`].
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Отложенный вызов обработчика. Выполняется не более одного раза.
pub type Callback = Box<dyn FnOnce() -> HandlerResult + Send + 'static>;

/// Ключ записи в [`DispatchQueue`](super::DispatchQueue).
///
/// Выдаётся монотонно под guard очереди, поэтому порядок ключей совпадает с
/// порядком постановки в очередь.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RemovalKey(pub u64);

/// Идентификатор подписки, владеющей элементом.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Один отложенный вызов обработчика для одного полученного сообщения.
///
/// Уничтожается либо вызовом [`WorkItem::invoke`], либо
/// [`WorkItem::discard`] при очистке очереди.
pub struct WorkItem {
    key: RemovalKey,
    subscription: SubscriptionId,
    call: Callback,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SubscriptionId {
    /// Выдаёт следующий свободный идентификатор.
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl WorkItem {
    pub fn new(
        key: RemovalKey,
        subscription: SubscriptionId,
        call: Callback,
    ) -> Self {
        Self {
            key,
            subscription,
            call,
        }
    }

    pub fn key(&self) -> RemovalKey {
        self.key
    }

    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Вызывает обработчик.
    ///
    /// Ошибка обработчика и паника внутри него превращаются в
    /// [`DispatchError`]; сама паника дальше не распространяется.
    pub fn invoke(self) -> Result<(), DispatchError> {
        let Self {
            key,
            subscription,
            call,
        } = self;

        match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(DispatchError::HandlerFailed {
                subscription: subscription.0,
                key: key.0,
                reason: err.to_string(),
            }),
            Err(payload) => Err(DispatchError::HandlerPanicked {
                subscription: subscription.0,
                key: key.0,
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    /// Выбрасывает элемент без вызова обработчика.
    pub fn discard(self) {
        tracing::trace!(
            key = self.key.0,
            subscription = self.subscription.0,
            "Work item discarded"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for RemovalKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("key", &self.key)
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use spindle_error::{ErrorExt, HandlerError, StatusCode};

    use super::*;

    fn item_with(call: Callback) -> WorkItem {
        WorkItem::new(RemovalKey(7), SubscriptionId(3), call)
    }

    /// Успешный вызов выполняет обработчик ровно один раз.
    #[test]
    fn test_invoke_runs_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let item = item_with(Box::new(move || -> HandlerResult {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        assert!(item.invoke().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Ошибка обработчика возвращается как `HandlerFailed` с ключом элемента.
    #[test]
    fn test_invoke_reports_handler_error() {
        let item = item_with(Box::new(|| -> HandlerResult { Err(HandlerError::new("bad payload")) }));

        let err = item.invoke().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::HandlerFailed);
        assert_eq!(err.key(), 7);
        assert_eq!(err.subscription(), 3);
        assert!(err.to_string().contains("bad payload"));
    }

    /// Паника обработчика перехватывается и превращается в `HandlerPanicked`.
    #[test]
    fn test_invoke_catches_panic() {
        let item = item_with(Box::new(|| -> HandlerResult { panic!("handler exploded") }));

        let err = item.invoke().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::HandlerPanicked);
        assert!(err.to_string().contains("handler exploded"));
    }

    #[test]
    fn test_discard_never_invokes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let item = item_with(Box::new(move || -> HandlerResult {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        item.discard();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let a = SubscriptionId::next();
        let b = SubscriptionId::next();
        assert!(b > a);
        assert_eq!(RemovalKey(5).to_string(), "#5");
    }
}
