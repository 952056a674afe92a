//! Shared ownership primitive for domain objects
//!
//! Strong ownership is plain `Arc`. Back-references that must not keep an
//! object alive (a device's active-channel slot, a forwarded child's parent)
//! are [`Handle`]s into an [`ObjectRegistry`]: an index plus a generation
//! counter. Releasing an object bumps the slot generation, so stale handles
//! fail to retain instead of observing a destroyed object.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Generation-checked weak reference into an [`ObjectRegistry`]
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_raw(index: u32, generation: u32) -> Self {
        Self::new(index, generation)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    object: Option<Arc<T>>,
}

/// Arena of live objects addressed by [`Handle`]
pub struct ObjectRegistry<T> {
    kind: &'static str,
    slots: RwLock<Vec<Slot<T>>>,
    free: Mutex<Vec<u32>>,
    live: AtomicUsize,
}

impl<T> ObjectRegistry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slots: RwLock::new(Vec::new()),
            free: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
        }
    }

    /// Register an object built from its own handle
    pub fn register_with<F>(&self, build: F) -> Arc<T>
    where
        F: FnOnce(Handle<T>) -> T,
    {
        let mut slots = self.slots.write();
        let index = match self.free.lock().pop() {
            Some(index) => index,
            None => {
                slots.push(Slot {
                    generation: 0,
                    object: None,
                });
                (slots.len() - 1) as u32
            }
        };
        let slot = &mut slots[index as usize];
        let object = Arc::new(build(Handle::new(index, slot.generation)));
        slot.object = Some(object.clone());
        self.live.fetch_add(1, Ordering::AcqRel);
        debug!("{}: registered slot {}v{}", self.kind, index, slot.generation);
        object
    }

    /// Take a new strong reference, `None` when the object was released
    pub fn retain(&self, handle: Handle<T>) -> Option<Arc<T>> {
        let slots = self.slots.read();
        slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.object.clone())
    }

    pub fn is_live(&self, handle: Handle<T>) -> bool {
        self.retain(handle).is_some()
    }

    /// Drop the registry's reference and invalidate every outstanding handle.
    ///
    /// Returns the registry's strong reference so the caller decides when the
    /// last holder goes away; a second release of the same handle is `None`.
    pub fn release(&self, handle: Handle<T>) -> Option<Arc<T>> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let object = slot.object.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.lock().push(handle.index);
        self.live.fetch_sub(1, Ordering::AcqRel);
        debug!("{}: released slot {}v{}", self.kind, handle.index, handle.generation);
        Some(object)
    }

    /// Snapshot of every live object
    pub fn live_objects(&self) -> Vec<Arc<T>> {
        self.slots
            .read()
            .iter()
            .filter_map(|slot| slot.object.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

/// Guard making a destructor body run exactly once across threads
#[derive(Debug, Default)]
pub struct DestroyOnce(AtomicBool);

impl DestroyOnce {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// `true` for the single caller allowed to run the destructor
    pub fn begin(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct Entry {
        handle: Handle<Entry>,
        name: String,
    }

    #[test]
    fn test_register_and_retain() {
        let registry: ObjectRegistry<Entry> = ObjectRegistry::new("entry");
        let entry = registry.register_with(|handle| Entry {
            handle,
            name: "a".to_string(),
        });
        let again = registry.retain(entry.handle).unwrap();
        assert!(Arc::ptr_eq(&entry, &again));
        assert_eq!(again.name, "a");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_handle_after_release() {
        let registry: ObjectRegistry<Entry> = ObjectRegistry::new("entry");
        let first = registry.register_with(|handle| Entry {
            handle,
            name: "first".to_string(),
        });
        let stale = first.handle;
        assert!(registry.release(stale).is_some());
        assert!(registry.release(stale).is_none());
        assert!(registry.retain(stale).is_none());

        // Slot gets reused with a new generation
        let second = registry.register_with(|handle| Entry {
            handle,
            name: "second".to_string(),
        });
        assert_eq!(second.handle.index(), stale.index());
        assert_ne!(second.handle, stale);
        assert!(registry.retain(stale).is_none());
        assert_eq!(registry.retain(second.handle).unwrap().name, "second");
    }

    #[test]
    fn test_destroy_once_under_contention() {
        let guard = Arc::new(DestroyOnce::new());
        let winners: usize = (0..8)
            .map(|_| {
                let guard = guard.clone();
                thread::spawn(move || guard.begin() as usize)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap())
            .sum();
        assert_eq!(winners, 1);
        assert!(guard.is_destroyed());
    }

    #[test]
    fn test_concurrent_release_yields_single_owner() {
        let registry: Arc<ObjectRegistry<Entry>> = Arc::new(ObjectRegistry::new("entry"));
        let entry = registry.register_with(|handle| Entry {
            handle,
            name: "x".to_string(),
        });
        let handle = entry.handle;
        drop(entry);
        let released: usize = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.release(handle).is_some() as usize)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap())
            .sum();
        assert_eq!(released, 1);
        assert!(registry.is_empty());
    }
}
