use std::{
    any::Any,
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{Error, Label, Result};

/// Type-erased broker entry.
pub type SharedEntry = Arc<dyn Any + Send + Sync>;

type Factory = Box<dyn Fn(&str) -> Option<SharedEntry> + Send + Sync>;

/// Category of a broker entry. Each category has its own namespace and its
/// own factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Label)]
pub enum EntryKind {
    Object,
    Collection,
    Selection,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<Arc<str>, SharedEntry>,
    misses: HashSet<Arc<str>>,
    factory: Option<Factory>,
}

/// Process-wide name → instance registry.
///
/// Lookups return the cached instance, else ask the category's factory (at
/// most once per missing name), else report absence. Absence is a regular
/// outcome: probed state comes and goes.
///
/// Factories run while the broker is locked and must not call back into it.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use remora::{EntryKind, ObjectBroker};
///
/// let broker = ObjectBroker::new();
/// broker.set_factory(EntryKind::Object, |name| {
///     (name == "answer").then(|| Arc::new(42u32) as _)
/// });
///
/// assert_eq!(*broker.object::<u32>("answer").unwrap(), 42);
/// assert!(broker.object::<u32>("question").is_none());
/// ```
#[derive(Default)]
pub struct ObjectBroker {
    registries: Mutex<HashMap<EntryKind, Registry>>,
}

impl ObjectBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance. Registering a name twice is a programming error
    /// and fails with [`Error::DuplicateRegistration`].
    pub fn register<T>(&self, kind: EntryKind, name: impl Into<Arc<str>>, value: Arc<T>) -> Result<()>
    where
        T: Any + Send + Sync,
    {
        let name = name.into();
        let mut registries = self.registries.lock();
        let registry = registries.entry(kind).or_default();
        if registry.entries.contains_key(&name) {
            return Err(Error::DuplicateRegistration(name));
        }
        tracing::debug!(kind = %kind.label(), %name, "Broker entry registered");
        registry.misses.remove(&name);
        registry.entries.insert(name, value);
        Ok(())
    }

    /// Install the factory consulted for missing names of `kind`.
    pub fn set_factory<F>(&self, kind: EntryKind, factory: F)
    where
        F: Fn(&str) -> Option<SharedEntry> + Send + Sync + 'static,
    {
        let mut registries = self.registries.lock();
        let registry = registries.entry(kind).or_default();
        registry.misses.clear();
        registry.factory = Some(Box::new(factory));
    }

    /// Look up `name`, creating it through the factory if needed.
    pub fn get_entry(&self, kind: EntryKind, name: &str) -> Option<SharedEntry> {
        let mut registries = self.registries.lock();
        let registry = registries.entry(kind).or_default();
        if let Some(entry) = registry.entries.get(name) {
            return Some(entry.clone());
        }
        if registry.misses.contains(name) {
            return None;
        }
        let name: Arc<str> = name.into();
        match registry.factory.as_ref().and_then(|factory| factory(&name)) {
            Some(entry) => {
                tracing::debug!(kind = %kind.label(), %name, "Broker entry created by factory");
                registry.entries.insert(name, entry.clone());
                Some(entry)
            }
            None => {
                registry.misses.insert(name);
                None
            }
        }
    }

    /// Typed lookup. `None` if absent or registered with another type.
    pub fn get<T>(&self, kind: EntryKind, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.get_entry(kind, name)?.downcast::<T>().ok()
    }

    pub fn object<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.get(EntryKind::Object, name)
    }

    pub fn collection<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.get(EntryKind::Collection, name)
    }

    pub fn selection<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.get(EntryKind::Selection, name)
    }

    /// Remove an entry. The factory may recreate it on the next lookup.
    pub fn remove(&self, kind: EntryKind, name: &str) -> Option<SharedEntry> {
        let mut registries = self.registries.lock();
        let registry = registries.get_mut(&kind)?;
        registry.misses.remove(name);
        registry.entries.remove(name)
    }

    /// Whether `name` is currently registered, without consulting the factory.
    pub fn contains(&self, kind: EntryKind, name: &str) -> bool {
        self.registries
            .lock()
            .get(&kind)
            .is_some_and(|r| r.entries.contains_key(name))
    }

    /// Registered names of one category, sorted.
    pub fn names(&self, kind: EntryKind) -> Vec<Arc<str>> {
        let registries = self.registries.lock();
        let mut names: Vec<_> = registries
            .get(&kind)
            .map(|r| r.entries.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ObjectBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registries = self.registries.lock();
        let mut s = f.debug_struct("ObjectBroker");
        for (kind, registry) in registries.iter() {
            s.field(&kind.label(), &registry.entries.len());
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_duplicate_registration_fails() {
        let broker = ObjectBroker::new();
        broker
            .register(EntryKind::Collection, "tree", Arc::new(1u8))
            .unwrap();
        assert!(matches!(
            broker.register(EntryKind::Collection, "tree", Arc::new(2u8)),
            Err(Error::DuplicateRegistration(_))
        ));
        // separate namespaces per category
        broker
            .register(EntryKind::Selection, "tree", Arc::new(3u8))
            .unwrap();
    }

    #[test]
    fn test_factory_runs_at_most_once_per_name() {
        let calls = Arc::new(AtomicUsize::new(0));
        let broker = ObjectBroker::new();
        let counter = calls.clone();
        broker.set_factory(EntryKind::Collection, move |name| {
            counter.fetch_add(1, Ordering::SeqCst);
            (name != "missing").then(|| Arc::new(name.to_string()) as SharedEntry)
        });

        assert_eq!(*broker.collection::<String>("a").unwrap(), "a");
        assert_eq!(*broker.collection::<String>("a").unwrap(), "a");
        assert!(broker.collection::<String>("missing").is_none());
        assert!(broker.collection::<String>("missing").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_absence_is_not_an_error() {
        let broker = ObjectBroker::new();
        assert!(broker.object::<u32>("nothing").is_none());
        assert!(!broker.contains(EntryKind::Object, "nothing"));
    }

    #[test]
    fn test_wrong_type_yields_none() {
        let broker = ObjectBroker::new();
        broker.register(EntryKind::Object, "n", Arc::new(5u32)).unwrap();
        assert!(broker.object::<String>("n").is_none());
        assert_eq!(*broker.object::<u32>("n").unwrap(), 5);
    }

    #[test]
    fn test_remove_and_names() {
        let broker = ObjectBroker::new();
        broker.register(EntryKind::Object, "b", Arc::new(())).unwrap();
        broker.register(EntryKind::Object, "a", Arc::new(())).unwrap();
        assert_eq!(broker.names(EntryKind::Object), vec!["a".into(), "b".into()] as Vec<Arc<str>>);
        assert!(broker.remove(EntryKind::Object, "a").is_some());
        assert_eq!(broker.names(EntryKind::Object).len(), 1);
        broker.register(EntryKind::Object, "a", Arc::new(())).unwrap();
    }
}
