use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::error;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Entries<T> = Arc<Mutex<Vec<(u64, Callback<T>)>>>;

/// Fan-out registry. Delivery works on a snapshot of the registered
/// callbacks, so callbacks may (un)subscribe or call back into the owner.
pub struct ListenerSet<T> {
    label: &'static str,
    entries: Entries<T>,
    next_id: AtomicU64,
}

impl<T: 'static> ListenerSet<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, Arc::new(callback)));
        let entries = Arc::downgrade(&self.entries);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(entries) = entries.upgrade() {
                    entries.lock().retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Deliver `value` to every callback. A panicking callback is logged and
    /// skipped; the rest still run. Returns the number of callbacks that
    /// panicked.
    pub fn emit(&self, value: &T) -> usize {
        let snapshot: Vec<(u64, Callback<T>)> = self.entries.lock().clone();
        let mut failures = 0;
        for (id, callback) in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(value))) {
                failures += 1;
                error!(
                    target = "channel::listener",
                    listeners = self.label,
                    listener_id = id,
                    reason = %panic_message(panic.as_ref()),
                    "listener panicked; continuing delivery"
                );
            }
        }
        failures
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle returned by every `on_*` registration. Dropping it keeps the
/// listener registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// A handle for a registration that never happened (e.g. on a disposed
    /// channel).
    pub(crate) fn inert() -> Self {
        Self { remove: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_to_every_listener_in_registration_order() {
        let set = ListenerSet::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            set.add(move |value: &u32| seen.lock().push(format!("{tag}{value}")));
        }

        assert_eq!(set.emit(&1), 0);
        assert_eq!(seen.lock().as_slice(), ["a1", "b1", "c1"]);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let set = ListenerSet::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        set.add(|_: &u32| panic!("listener blew up"));
        {
            let seen = Arc::clone(&seen);
            set.add(move |value: &u32| seen.lock().push(*value));
        }

        assert_eq!(set.emit(&5), 1);
        assert_eq!(set.emit(&6), 1);
        assert_eq!(seen.lock().as_slice(), [5, 6]);
    }

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let set = ListenerSet::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let seen = Arc::clone(&seen);
            set.add(move |value: &u32| seen.lock().push(("first", *value)))
        };
        {
            let seen = Arc::clone(&seen);
            set.add(move |value: &u32| seen.lock().push(("second", *value)));
        }

        set.emit(&1);
        first.unsubscribe();
        set.emit(&2);

        assert_eq!(set.len(), 1);
        assert_eq!(
            seen.lock().as_slice(),
            [("first", 1), ("second", 1), ("second", 2)]
        );
    }

    #[test]
    fn unsubscribe_after_set_dropped_is_harmless() {
        let set = ListenerSet::new("test");
        let subscription = set.add(|_: &u32| {});
        drop(set);
        subscription.unsubscribe();
    }
}
