//! Handler multiplexer: named callbacks per event key.
//!
//! Used identically for property and signal listeners. Callbacks for a key
//! fire synchronously on the emitting thread, in registration order. A
//! callback that blocks or panics delays or aborts the ones after it.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A registered listener callback.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identifies one registration, for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered callbacks keyed by member name.
pub struct Emitter<T> {
    handlers: HashMap<String, Vec<(HandlerId, Callback<T>)>>,
}

impl<T> Emitter<T> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `callback` for `key`. The returned id removes exactly this
    /// registration via [`Emitter::off`].
    pub fn on<F>(&mut self, key: &str, callback: F) -> HandlerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = HandlerId::new();
        self.handlers
            .entry(key.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a registration. Returns false if it was not present.
    pub fn off(&mut self, key: &str, id: HandlerId) -> bool {
        let Some(list) = self.handlers.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|(h, _)| *h != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.handlers.remove(key);
        }
        removed
    }

    /// Invoke every callback for `key` in registration order.
    /// Returns how many were called.
    pub fn emit(&self, key: &str, payload: &T) -> usize {
        let Some(list) = self.handlers.get(key) else {
            return 0;
        };
        for (_, callback) in list {
            callback(payload);
        }
        list.len()
    }

    /// Snapshot of the callbacks for `key`, in registration order.
    ///
    /// Lets a caller release the lock guarding the emitter before firing.
    pub fn handlers(&self, key: &str) -> Vec<Callback<T>> {
        self.handlers
            .get(key)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    /// Number of callbacks registered for `key`.
    pub fn count(&self, key: &str) -> usize {
        self.handlers.get(key).map_or(0, Vec::len)
    }
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut emitter = Emitter::<i32>::new();
        for tag in ["a", "b", "c"] {
            let calls = Arc::clone(&calls);
            emitter.on("total", move |v: &i32| calls.lock().unwrap().push(format!("{tag}{v}")));
        }
        assert_eq!(emitter.emit("total", &7), 3);
        assert_eq!(*calls.lock().unwrap(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn test_emit_unknown_key_is_noop() {
        let emitter = Emitter::<i32>::new();
        assert_eq!(emitter.emit("nothing", &1), 0);
        assert!(emitter.handlers("nothing").is_empty());
    }

    #[test]
    fn test_off_removes_only_that_handler() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut emitter = Emitter::<i32>::new();
        let c1 = Arc::clone(&calls);
        let first = emitter.on("k", move |_| c1.lock().unwrap().push("first"));
        let c2 = Arc::clone(&calls);
        emitter.on("k", move |_| c2.lock().unwrap().push("second"));

        assert!(emitter.off("k", first));
        assert!(!emitter.off("k", first));
        assert!(!emitter.off("other", first));

        emitter.emit("k", &0);
        assert_eq!(*calls.lock().unwrap(), vec!["second"]);
        assert_eq!(emitter.count("k"), 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut emitter = Emitter::<i32>::new();
        emitter.on("a", |_| {});
        let id = emitter.on("b", |_| {});
        assert!(emitter.off("b", id));
        assert_eq!(emitter.count("a"), 1);
        assert_eq!(emitter.count("b"), 0);
    }
}
