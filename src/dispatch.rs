//! The listener table everything observable in this crate is built on.
//!
//! A [`Dispatcher`] owns an ordered list of listeners. "Listener" here means
//! an `Rc` of some listener trait object whose methods all have empty default
//! bodies, so implementors only write the handlers they care about and the
//! dispatcher happily delivers past the gaps.
//!
//! Listeners may be *locked* on insertion. A locked listener is load-bearing
//! wiring (an entity keeping its component cache fresh, an engine watching
//! its systems), and attempts to remove it fail with
//! [`LockedListenerError`] instead of silently breaking the machinery.
//!
//! Listener methods take `&self`. Handlers that need state keep it in a
//! `Cell`/`RefCell`. This is what makes recursive dispatch legal: a handler
//! may mutate the very collection it is being notified about, which delivers
//! the nested event to the same listener objects before the outer dispatch
//! continues.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

/// Returned when trying to remove a listener that was registered with the
/// lock flag.
#[derive(Debug, Clone, Error)]
#[error("listener at index {index} is locked and cannot be removed")]
pub struct LockedListenerError {
    /// Where in the listener list the locked listener sits.
    pub index: usize,
}

struct Entry<L: ?Sized> {
    listener: Rc<L>,
    locked: bool,
    /// Set for listeners installed by an aspect or engine; the owner
    /// reclaims its slot through [`Dispatcher::remove_keyed`].
    key: Option<u64>,
}

/// An ordered, identity-deduplicated list of listeners.
pub struct Dispatcher<L: ?Sized> {
    entries: RefCell<Vec<Entry<L>>>,
}

impl<L: ?Sized> Dispatcher<L> {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    /// Append `listener` unless it is already registered (reference
    /// identity, not value equality). Returns false on a duplicate.
    ///
    /// A listener added with `lock` can never be removed through
    /// [`Dispatcher::remove_listener`].
    pub fn add_listener(&self, listener: Rc<L>, lock: bool) -> bool {
        let mut entries = self.entries.borrow_mut();
        if entries.iter().any(|e| Rc::ptr_eq(&e.listener, &listener)) {
            return false;
        }
        entries.push(Entry {
            listener,
            locked: lock,
            key: None,
        });
        true
    }

    /// Like [`Dispatcher::add_listener`], but the entry is claimed under
    /// `key`. At most one entry per key may exist; a second registration
    /// under the same key returns false.
    pub fn add_keyed_listener(&self, key: u64, listener: Rc<L>, lock: bool) -> bool {
        let mut entries = self.entries.borrow_mut();
        if entries
            .iter()
            .any(|e| e.key == Some(key) || Rc::ptr_eq(&e.listener, &listener))
        {
            return false;
        }
        entries.push(Entry {
            listener,
            locked: lock,
            key: Some(key),
        });
        true
    }

    pub fn has_keyed(&self, key: u64) -> bool {
        self.entries.borrow().iter().any(|e| e.key == Some(key))
    }

    /// Remove `listener` by reference identity. `Ok(false)` if it was never
    /// registered; an error if it is locked.
    pub fn remove_listener(&self, listener: &Rc<L>) -> Result<bool, LockedListenerError> {
        let mut entries = self.entries.borrow_mut();
        let Some(index) = entries
            .iter()
            .position(|e| Rc::ptr_eq(&e.listener, listener))
        else {
            return Ok(false);
        };
        if entries[index].locked {
            return Err(LockedListenerError { index });
        }
        entries.remove(index);
        Ok(true)
    }

    /// Remove the listener at `index`. Out-of-range indices return
    /// `Ok(false)`; locked entries error.
    pub fn remove_listener_at(&self, index: usize) -> Result<bool, LockedListenerError> {
        let mut entries = self.entries.borrow_mut();
        if index >= entries.len() {
            return Ok(false);
        }
        if entries[index].locked {
            return Err(LockedListenerError { index });
        }
        entries.remove(index);
        Ok(true)
    }

    /// Reclaim the entry registered under `key`, if any. This is the
    /// owner's path back to its own slot, so the lock flag does not apply.
    pub fn remove_keyed(&self, key: u64) -> bool {
        let mut entries = self.entries.borrow_mut();
        let Some(index) = entries.iter().position(|e| e.key == Some(key)) else {
            return false;
        };
        entries.remove(index);
        true
    }

    /// A shallow copy of the registered listeners, in insertion order.
    /// Mutating the returned vec does not affect the dispatcher.
    pub fn listeners(&self) -> Vec<Rc<L>> {
        self.entries
            .borrow()
            .iter()
            .map(|e| e.listener.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Invoke `deliver` on every listener, in the insertion order current at
    /// the time of the call. Listeners added or removed by a handler take
    /// effect from the next dispatch onwards.
    pub fn dispatch(&self, mut deliver: impl FnMut(&L)) {
        let snapshot = self.listeners();
        for listener in snapshot {
            deliver(&listener);
        }
    }
}

impl<L: ?Sized> Default for Dispatcher<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> std::fmt::Debug for Dispatcher<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.len())
            .finish()
    }
}
