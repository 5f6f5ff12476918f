//! Notification handler registry: method name → callback.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

pub type NotificationHandler = Arc<dyn Fn(Option<Value>) + Send + Sync>;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, NotificationHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`, replacing any previous one.
    pub fn register<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.into(), Arc::new(handler));
    }

    #[must_use]
    pub fn get(&self, method: &str) -> Option<NotificationHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
    }

    /// Invoke the handler for `method`, outside the registry lock.
    ///
    /// A panicking handler is contained and logged so the reader keeps
    /// running. Returns `false` when nothing is registered.
    pub fn dispatch(&self, method: &str, params: Option<Value>) -> bool {
        let Some(handler) = self.get(method) else {
            return false;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(params))) {
            tracing::error!(
                method,
                "notification handler panicked: {}",
                panic_message(payload.as_ref())
            );
        }
        true
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn reregistering_overwrites() {
        let registry = HandlerRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&first);
        registry.register("x/y", move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = Arc::clone(&second);
        registry.register("x/y", move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.dispatch("x/y", None));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_method_is_ignored() {
        let registry = HandlerRegistry::new();
        assert!(!registry.dispatch("foo/bar", Some(Value::Null)));
    }

    #[test]
    fn panicking_handler_is_contained() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register("boom", |_| panic!("handler failed"));
        let c = Arc::clone(&calls);
        registry.register("after", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.dispatch("boom", None));
        assert!(registry.dispatch("boom", None));
        assert!(registry.dispatch("after", None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_register_from_inside_callback() {
        let registry = Arc::new(HandlerRegistry::new());
        let inner = Arc::clone(&registry);
        registry.register("outer", move |_| {
            inner.register("late", |_| {});
        });
        assert!(registry.dispatch("outer", None));
        assert!(registry.get("late").is_some());
    }
}
