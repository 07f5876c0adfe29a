//! Typed per-connection capability registry.
//!
//! [`FeatureSet`] stores one value per concrete type, keyed by `TypeId`, so
//! cross-cutting concerns (TLS control, lifetime cancellation, localization,
//! listing facts) attach to a session without widening its core shape.
//! Values live in `Arc<dyn Any + Send + Sync>` for cheap sharing across the
//! connection's tasks.

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Stores per-connection capabilities keyed by concrete type.
///
/// Entries are created at most once per connection lifetime; a repeated
/// insert for the same type replaces the value and is considered a bug in
/// the caller.
#[derive(Default)]
pub struct FeatureSet {
    values: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl FeatureSet {
    /// Register a capability of type `T`.
    pub fn insert<T>(&self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.values
            .lock()
            .expect("feature registry lock poisoned")
            .insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Retrieve an optional capability; `None` when nothing of type `T` was
    /// registered.
    #[must_use]
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.values
            .lock()
            .expect("feature registry lock poisoned")
            .get(&TypeId::of::<T>())
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }

    /// Retrieve a mandatory capability.
    ///
    /// # Panics
    ///
    /// Panics with the capability's type name when it was never registered;
    /// a mandatory capability missing means the connection was assembled
    /// wrongly, which no handler can recover from.
    #[must_use]
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Send + Sync + 'static,
    {
        self.get::<T>()
            .unwrap_or_else(|| panic!("required connection capability {} is missing", type_name::<T>()))
    }

    /// Retrieve a capability, registering the result of `init` first when it
    /// is absent.
    pub fn get_or_insert_with<T>(&self, init: impl FnOnce() -> T) -> Arc<T>
    where
        T: Send + Sync + 'static,
    {
        let mut values = self.values.lock().expect("feature registry lock poisoned");
        let value = values
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(init()));
        Arc::clone(value)
            .downcast::<T>()
            .unwrap_or_else(|_| unreachable!("entry stored under its own TypeId"))
    }
}

impl std::fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.values.lock().map(|v| v.len()).unwrap_or_default();
        f.debug_struct("FeatureSet").field("entries", &len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::FeatureSet;

    #[derive(Debug, PartialEq)]
    struct Facts(Vec<&'static str>);

    #[test]
    fn typed_insert_and_get() {
        let features = FeatureSet::default();
        features.insert(Facts(vec!["size", "modify"]));
        features.insert(7u32);

        let facts = features.get::<Facts>().expect("facts were registered");
        assert_eq!(*facts, Facts(vec!["size", "modify"]));
        assert_eq!(*features.require::<u32>(), 7);
    }

    #[test]
    fn optional_capability_returns_none() {
        let features = FeatureSet::default();
        assert!(features.get::<Facts>().is_none());
    }

    #[test]
    #[should_panic(expected = "required connection capability")]
    fn mandatory_capability_fails_loudly() {
        let features = FeatureSet::default();
        let _ = features.require::<Facts>();
    }

    #[test]
    fn get_or_insert_initialises_once() {
        let features = FeatureSet::default();
        let first = features.get_or_insert_with(|| Facts(vec!["size"]));
        let second = features.get_or_insert_with(|| Facts(vec!["other"]));
        assert_eq!(*first, *second);
    }
}
